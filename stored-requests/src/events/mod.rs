//! Incremental cache updates.
//!
//! Event producers turn remote changes into `CacheEvent` deltas. All
//! producers for one cache feed a single listener task over a channel, so
//! scheduled polling and externally triggered invalidations share one
//! serialized mutation path.

use crate::cache::InMemoryCache;
use crate::metrics_defs::{EVENT_INVALIDATIONS, EVENT_SAVES};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use shared::counter;
use shared::refresh::{self, Refresher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod api;
pub mod http;
pub mod postgres;

/// Payloads to upsert into the cache.
#[derive(Clone, Debug, Default)]
pub struct Update {
    pub requests: HashMap<String, Bytes>,
    pub imps: HashMap<String, Bytes>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.imps.is_empty()
    }
}

/// IDs whose cache entries must be dropped.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Invalidation {
    #[serde(default)]
    pub requests: Vec<String>,
    #[serde(default)]
    pub imps: Vec<String>,
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.imps.is_empty()
    }
}

/// One delta applied to the cache.
#[derive(Clone, Debug)]
pub enum CacheEvent {
    Save(Update),
    Invalidate(Invalidation),
}

#[derive(thiserror::Error, Debug)]
pub enum EventError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("malformed update payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Produces cache deltas when polled, keeping whatever watermark state it
/// needs between polls.
#[async_trait]
pub trait EventSource: Send {
    fn name(&self) -> &'static str;

    async fn poll(&mut self) -> Result<Vec<CacheEvent>, EventError>;
}

/// The one task allowed to mutate a cache. Exits when every sender is gone.
pub fn spawn_listener(
    cache: Arc<InMemoryCache>,
    mut events: mpsc::Receiver<CacheEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            apply(&cache, event);
        }
    })
}

fn apply(cache: &InMemoryCache, event: CacheEvent) {
    match event {
        CacheEvent::Save(update) => {
            counter!(EVENT_SAVES).increment((update.requests.len() + update.imps.len()) as u64);
            cache.save(&update.requests, &update.imps);
        }
        CacheEvent::Invalidate(invalidation) => {
            counter!(EVENT_INVALIDATIONS)
                .increment((invalidation.requests.len() + invalidation.imps.len()) as u64);
            cache.invalidate(&invalidation.requests, &invalidation.imps);
        }
    }
}

/// Drives an event source on a fixed interval, forwarding whatever it
/// produces into the listener channel. Per-cycle errors are reported by the
/// refresh loop and the next tick proceeds normally.
pub fn spawn_source(
    source: impl EventSource + 'static,
    interval: Duration,
    events: mpsc::Sender<CacheEvent>,
) -> Refresher {
    let name = source.name();
    let source = Arc::new(tokio::sync::Mutex::new(source));

    refresh::spawn(name, interval, move || {
        let source = source.clone();
        let events = events.clone();
        async move {
            let produced = source.lock().await.poll().await?;
            for event in produced {
                if events.send(event).await.is_err() {
                    // Listener is gone; nothing left to update.
                    break;
                }
            }
            Ok::<(), EventError>(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryCacheConfig;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn listener_applies_saves_and_invalidations() {
        let cache = Arc::new(InMemoryCache::new(&InMemoryCacheConfig::default()));
        let (tx, rx) = mpsc::channel(16);
        let listener = spawn_listener(cache.clone(), rx);

        let mut update = Update::default();
        update
            .requests
            .insert("req-a".to_string(), Bytes::from_static(b"{}"));
        update
            .imps
            .insert("imp-a".to_string(), Bytes::from_static(b"{}"));
        tx.send(CacheEvent::Save(update)).await.unwrap();
        tx.send(CacheEvent::Invalidate(Invalidation {
            requests: ids(&["req-a"]),
            imps: vec![],
        }))
        .await
        .unwrap();

        // Closing the channel drains the listener deterministically.
        drop(tx);
        listener.await.unwrap();

        let result = cache.get(&ids(&["req-a"]), &ids(&["imp-a"]));
        assert_eq!(result.missing_requests, ids(&["req-a"]));
        assert!(result.imps.contains_key("imp-a"));
    }

    struct OneShotSource;

    #[async_trait]
    impl EventSource for OneShotSource {
        fn name(&self) -> &'static str {
            "one-shot"
        }

        async fn poll(&mut self) -> Result<Vec<CacheEvent>, EventError> {
            let mut update = Update::default();
            update
                .requests
                .insert("req-a".to_string(), Bytes::from_static(b"{}"));
            Ok(vec![CacheEvent::Save(update)])
        }
    }

    #[tokio::test]
    async fn sources_feed_the_listener() {
        let cache = Arc::new(InMemoryCache::new(&InMemoryCacheConfig::default()));
        let (tx, rx) = mpsc::channel(16);
        let _listener = spawn_listener(cache.clone(), rx);

        let mut refresher = spawn_source(OneShotSource, Duration::from_secs(3600), tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.stop().await;

        let result = cache.get(&ids(&["req-a"]), &[]);
        assert!(result.requests.contains_key("req-a"));
    }
}
