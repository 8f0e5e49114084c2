//! Backends that retrieve stored payloads by ID.
//!
//! A backend answers batch lookups and nothing else: no caching (that is
//! composed on top, see `CachedFetcher`) and no partial-failure guessing.
//! Either the batch fails as a whole, or it succeeds with explicit missing
//! IDs for the caller to judge.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

mod cached;
mod filesystem;
mod http;
mod postgres;

pub use cached::CachedFetcher;
pub use filesystem::FilesystemFetcher;
pub use http::HttpFetcher;
pub use postgres::{PostgresFetcher, connect};

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Raw payloads found for one batch, with explicit misses. A missing ID is
/// data, not an error: the endpoint layer decides whether it is a client
/// mistake or incomplete service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchResult {
    pub requests: HashMap<String, Bytes>,
    pub imps: HashMap<String, Bytes>,
    pub missing_requests: Vec<String>,
    pub missing_imps: Vec<String>,
}

impl FetchResult {
    pub fn is_complete(&self) -> bool {
        self.missing_requests.is_empty() && self.missing_imps.is_empty()
    }

    /// Marks as missing every requested ID with no payload yet.
    pub(crate) fn fill_missing(&mut self, request_ids: &[String], imp_ids: &[String]) {
        for id in request_ids {
            if !self.requests.contains_key(id) {
                self.missing_requests.push(id.clone());
            }
        }
        for id in imp_ids {
            if !self.imps.contains_key(id) {
                self.missing_imps.push(id.clone());
            }
        }
    }
}

/// Retrieves raw stored payloads for a batch of IDs.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<FetchResult, FetchError>;
}

/// Stands in when no backend is configured: every ID is missing.
pub struct EmptyFetcher;

#[async_trait]
impl Fetcher for EmptyFetcher {
    async fn fetch(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<FetchResult, FetchError> {
        let mut result = FetchResult::default();
        result.fill_missing(request_ids, imp_ids);
        Ok(result)
    }
}
