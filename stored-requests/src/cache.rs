//! Bounded, TTL-aware in-memory cache for stored payloads.

use crate::config::InMemoryCacheConfig;
use crate::fetcher::FetchResult;
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS};
use bytes::Bytes;
use moka::sync::Cache;
use shared::counter;
use std::collections::HashMap;
use std::time::Duration;

/// Stored requests and stored imps are wholly independent eviction
/// domains: each category has its own byte budget, and inserting into one
/// can never evict from the other. Entries past the configured TTL are
/// treated as absent on the next lookup.
pub struct InMemoryCache {
    requests: Cache<String, Bytes>,
    imps: Cache<String, Bytes>,
}

impl InMemoryCache {
    pub fn new(config: &InMemoryCacheConfig) -> Self {
        InMemoryCache {
            requests: build_cache(config.ttl_seconds, config.request_cache_size_bytes),
            imps: build_cache(config.ttl_seconds, config.imp_cache_size_bytes),
        }
    }

    /// Batch lookup. Hits land in the result maps, everything else in the
    /// missing lists for the caller to fetch from the backend.
    pub fn get(&self, request_ids: &[String], imp_ids: &[String]) -> FetchResult {
        let mut result = FetchResult::default();
        lookup(
            &self.requests,
            request_ids,
            &mut result.requests,
            &mut result.missing_requests,
        );
        lookup(
            &self.imps,
            imp_ids,
            &mut result.imps,
            &mut result.missing_imps,
        );
        result
    }

    pub fn save(&self, requests: &HashMap<String, Bytes>, imps: &HashMap<String, Bytes>) {
        for (id, data) in requests {
            self.requests.insert(id.clone(), data.clone());
        }
        for (id, data) in imps {
            self.imps.insert(id.clone(), data.clone());
        }
    }

    pub fn invalidate(&self, request_ids: &[String], imp_ids: &[String]) {
        for id in request_ids {
            self.requests.invalidate(id);
        }
        for id in imp_ids {
            self.imps.invalidate(id);
        }
    }
}

// A budget <= 0 means unbounded; a TTL <= 0 means entries only ever leave
// by eviction or invalidation.
fn build_cache(ttl_seconds: i64, size_bytes: i64) -> Cache<String, Bytes> {
    let mut builder =
        Cache::builder().weigher(|_id: &String, data: &Bytes| {
            data.len().try_into().unwrap_or(u32::MAX)
        });
    if size_bytes > 0 {
        builder = builder.max_capacity(size_bytes as u64);
    }
    if ttl_seconds > 0 {
        builder = builder.time_to_live(Duration::from_secs(ttl_seconds as u64));
    }
    builder.build()
}

fn lookup(
    cache: &Cache<String, Bytes>,
    ids: &[String],
    found: &mut HashMap<String, Bytes>,
    missing: &mut Vec<String>,
) {
    for id in ids {
        match cache.get(id) {
            Some(data) => {
                counter!(CACHE_HIT).increment(1);
                found.insert(id.clone(), data);
            }
            None => {
                counter!(CACHE_MISS).increment(1);
                missing.push(id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unbounded() -> InMemoryCache {
        InMemoryCache::new(&InMemoryCacheConfig::default())
    }

    fn entries(items: &[(&str, &str)]) -> HashMap<String, Bytes> {
        items
            .iter()
            .map(|(id, data)| (id.to_string(), Bytes::copy_from_slice(data.as_bytes())))
            .collect()
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn get_reports_hits_and_misses() {
        let cache = unbounded();
        cache.save(&entries(&[("req-a", "{}")]), &entries(&[("imp-a", "{}")]));

        let result = cache.get(&ids(&["req-a", "req-b"]), &ids(&["imp-a", "imp-b"]));
        assert_eq!(result.requests.len(), 1);
        assert!(result.requests.contains_key("req-a"));
        assert_eq!(result.missing_requests, ids(&["req-b"]));
        assert_eq!(result.imps.len(), 1);
        assert_eq!(result.missing_imps, ids(&["imp-b"]));
    }

    #[test]
    fn invalidated_entries_are_absent() {
        let cache = unbounded();
        cache.save(&entries(&[("req-a", "{}")]), &entries(&[("imp-a", "{}")]));
        cache.invalidate(&ids(&["req-a"]), &ids(&["imp-a"]));

        let result = cache.get(&ids(&["req-a"]), &ids(&["imp-a"]));
        assert!(result.requests.is_empty());
        assert_eq!(result.missing_requests, ids(&["req-a"]));
        assert_eq!(result.missing_imps, ids(&["imp-a"]));
    }

    #[test]
    fn requests_never_exceed_their_byte_budget() {
        let cache = InMemoryCache::new(&InMemoryCacheConfig {
            ttl_seconds: 0,
            request_cache_size_bytes: 100,
            imp_cache_size_bytes: 0,
        });

        let payload = "x".repeat(40);
        for id in ["req-a", "req-b", "req-c", "req-d"] {
            cache.save(&entries(&[(id, &payload)]), &HashMap::new());
        }

        cache.requests.run_pending_tasks();
        assert!(cache.requests.weighted_size() <= 100);
    }

    #[test]
    fn imp_inserts_never_evict_requests() {
        let cache = InMemoryCache::new(&InMemoryCacheConfig {
            ttl_seconds: 0,
            request_cache_size_bytes: 100,
            imp_cache_size_bytes: 100,
        });

        let payload = "x".repeat(40);
        cache.save(
            &entries(&[("req-a", &payload), ("req-b", &payload)]),
            &HashMap::new(),
        );

        // Overflow the imp budget several times over.
        for id in ["imp-a", "imp-b", "imp-c", "imp-d", "imp-e"] {
            cache.save(&HashMap::new(), &entries(&[(id, &payload)]));
        }

        cache.requests.run_pending_tasks();
        cache.imps.run_pending_tasks();
        assert!(cache.imps.weighted_size() <= 100);

        let result = cache.get(&ids(&["req-a", "req-b"]), &[]);
        assert_eq!(result.requests.len(), 2);
        assert!(result.missing_requests.is_empty());
    }
}
