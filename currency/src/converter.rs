//! Periodic currency-rate synchronization.
//!
//! The converter keeps an immutable rate snapshot fresh by fetching the
//! configured source on an interval. Readers clone the published `Arc`
//! without blocking the refresh; only the background task replaces it.

use crate::conversion::{Conversions, try_parse_date};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared::refresh::{self, Refresher};
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum HttpGetError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
}

/// The narrow "GET returns a body" capability the converter depends on.
/// Production wires in `ReqwestGet`; tests substitute a canned client.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes, HttpGetError>;
}

pub struct ReqwestGet {
    client: reqwest::Client,
}

impl ReqwestGet {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(ReqwestGet {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl HttpGet for ReqwestGet {
    async fn get(&self, url: &str) -> Result<Bytes, HttpGetError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HttpGetError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("rate source request failed: {0}")]
    Http(#[from] HttpGetError),
    #[error("malformed rate payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
#[error("currency converter is already running")]
pub struct AlreadyRunning;

#[derive(Default)]
struct Published {
    conversions: Option<Arc<Conversions>>,
    last_fetched: Option<DateTime<Utc>>,
}

/// Fetches conversion rates from a remote source and republishes them on a
/// fixed interval. A converter that has never fetched publishes nothing.
pub struct CurrencyConverter {
    client: Arc<dyn HttpGet>,
    source_url: String,
    refresh_interval: Duration,
    published: Arc<RwLock<Published>>,
    refresher: Option<Refresher>,
}

impl CurrencyConverter {
    pub fn new(
        source_url: impl Into<String>,
        refresh_interval: Duration,
        client: Arc<dyn HttpGet>,
    ) -> Self {
        CurrencyConverter {
            client,
            source_url: source_url.into(),
            refresh_interval,
            published: Arc::new(RwLock::new(Published::default())),
            refresher: None,
        }
    }

    /// One fetch-and-publish cycle. On failure the previously published
    /// snapshot is left untouched.
    pub async fn fetch_once(&self) -> Result<(), FetchError> {
        fetch_and_publish(self.client.as_ref(), &self.source_url, &self.published).await
    }

    /// Spawns the background refresh loop, starting with an immediate fetch.
    /// Errors if a loop is already running; stop first.
    pub fn start(&mut self) -> Result<(), AlreadyRunning> {
        if self.refresher.is_some() {
            return Err(AlreadyRunning);
        }

        let client = self.client.clone();
        let source_url = self.source_url.clone();
        let published = self.published.clone();
        self.refresher = Some(refresh::spawn(
            "currency-rates",
            self.refresh_interval,
            move || {
                let client = client.clone();
                let source_url = source_url.clone();
                let published = published.clone();
                async move { fetch_and_publish(client.as_ref(), &source_url, &published).await }
            },
        ));

        Ok(())
    }

    /// Stops the refresh loop and waits for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut refresher) = self.refresher.take() {
            refresher.stop().await;
        }
    }

    /// The currently published snapshot, if any fetch has succeeded.
    pub fn conversions(&self) -> Option<Arc<Conversions>> {
        self.published.read().conversions.clone()
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.published.read().last_fetched
    }
}

async fn fetch_and_publish(
    client: &dyn HttpGet,
    url: &str,
    published: &RwLock<Published>,
) -> Result<(), FetchError> {
    let body = client.get(url).await?;
    let mut snapshot: Conversions = serde_json::from_slice(&body)?;
    snapshot.data_as_of = try_parse_date(&snapshot.data_as_of_raw);

    let snapshot = Arc::new(snapshot);
    let mut guard = published.write();
    guard.conversions = Some(snapshot);
    guard.last_fetched = Some(Utc::now());
    Ok(())
}
