use super::{FetchError, FetchResult, Fetcher};
use crate::cache::InMemoryCache;
use async_trait::async_trait;
use std::sync::Arc;

/// Composes the cache in front of a backend: hits are served locally, only
/// the misses go to the inner fetcher, and whatever it finds is saved back
/// on the way out.
pub struct CachedFetcher {
    inner: Arc<dyn Fetcher>,
    cache: Arc<InMemoryCache>,
}

impl CachedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, cache: Arc<InMemoryCache>) -> Self {
        CachedFetcher { inner, cache }
    }
}

#[async_trait]
impl Fetcher for CachedFetcher {
    async fn fetch(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<FetchResult, FetchError> {
        let mut result = self.cache.get(request_ids, imp_ids);
        if result.is_complete() {
            return Ok(result);
        }

        let missing_requests = std::mem::take(&mut result.missing_requests);
        let missing_imps = std::mem::take(&mut result.missing_imps);
        let fetched = self.inner.fetch(&missing_requests, &missing_imps).await?;

        self.cache.save(&fetched.requests, &fetched.imps);

        result.requests.extend(fetched.requests);
        result.imps.extend(fetched.imps);
        result.missing_requests = fetched.missing_requests;
        result.missing_imps = fetched.missing_imps;
        Ok(result)
    }
}
