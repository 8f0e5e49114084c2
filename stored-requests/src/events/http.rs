//! HTTP event polling.
//!
//! The first poll GETs the endpoint bare and treats the body as a full
//! population. Later polls append `?last-modified=<rfc3339>`, where the
//! timestamp was captured just before the previous successful poll began,
//! so changes landing mid-request are re-reported next tick rather than
//! skipped. In the body, a JSON `null` payload marks a deleted entry.

use super::{CacheEvent, EventError, EventSource, Invalidation, Update};
use crate::Surface;
use bytes::Bytes;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::time::Duration;

pub struct HttpEventsPoller {
    client: reqwest::Client,
    endpoint: String,
    surface: Surface,
    last_modified: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct UpdatesBody {
    #[serde(default)]
    requests: HashMap<String, Option<Box<RawValue>>>,
    #[serde(default)]
    imps: HashMap<String, Option<Box<RawValue>>>,
}

impl HttpEventsPoller {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        surface: Surface,
    ) -> Result<Self, reqwest::Error> {
        Ok(HttpEventsPoller {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
            surface,
            last_modified: None,
        })
    }
}

#[async_trait]
impl EventSource for HttpEventsPoller {
    fn name(&self) -> &'static str {
        match self.surface {
            Surface::Auction => "http-events-openrtb2",
            Surface::Amp => "http-events-amp",
        }
    }

    async fn poll(&mut self) -> Result<Vec<CacheEvent>, EventError> {
        let started = Utc::now();

        let mut request = self.client.get(&self.endpoint);
        if let Some(since) = self.last_modified {
            request = request.query(&[(
                "last-modified",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            )]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EventError::Status(response.status().as_u16()));
        }
        let body: UpdatesBody = serde_json::from_slice(&response.bytes().await?)?;

        self.last_modified = Some(started);
        Ok(split_events(body))
    }
}

fn split_events(body: UpdatesBody) -> Vec<CacheEvent> {
    let mut update = Update::default();
    let mut invalidation = Invalidation::default();

    for (id, payload) in body.requests {
        match payload {
            Some(raw) => {
                update
                    .requests
                    .insert(id, Bytes::copy_from_slice(raw.get().as_bytes()));
            }
            None => invalidation.requests.push(id),
        }
    }
    for (id, payload) in body.imps {
        match payload {
            Some(raw) => {
                update
                    .imps
                    .insert(id, Bytes::copy_from_slice(raw.get().as_bytes()));
            }
            None => invalidation.imps.push(id),
        }
    }

    let mut events = Vec::new();
    if !update.is_empty() {
        events.push(CacheEvent::Save(update));
    }
    if !invalidation.is_empty() {
        events.push(CacheEvent::Invalidate(invalidation));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Query, State};
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[test]
    fn null_payloads_become_invalidations() {
        let body: UpdatesBody = serde_json::from_str(
            r#"{
                "requests": { "req-a": { "id": "req-a" }, "req-gone": null },
                "imps": { "imp-gone": null }
            }"#,
        )
        .unwrap();

        let events = split_events(body);
        assert_eq!(events.len(), 2);

        let save = events
            .iter()
            .find_map(|e| match e {
                CacheEvent::Save(update) => Some(update),
                _ => None,
            })
            .unwrap();
        assert!(save.requests.contains_key("req-a"));
        assert!(save.imps.is_empty());

        let invalidation = events
            .iter()
            .find_map(|e| match e {
                CacheEvent::Invalidate(invalidation) => Some(invalidation),
                _ => None,
            })
            .unwrap();
        assert_eq!(invalidation.requests, vec!["req-gone".to_string()]);
        assert_eq!(invalidation.imps, vec!["imp-gone".to_string()]);
    }

    #[test]
    fn empty_body_produces_no_events() {
        let body: UpdatesBody = serde_json::from_str("{}").unwrap();
        assert!(split_events(body).is_empty());
    }

    #[tokio::test]
    async fn only_polls_after_the_first_send_last_modified() {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new()
            .route(
                "/events",
                get(
                    |State(seen): State<Arc<Mutex<Vec<Option<String>>>>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        seen.lock().unwrap().push(params.get("last-modified").cloned());
                        axum::Json(serde_json::json!({ "requests": {}, "imps": {} }))
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut poller = HttpEventsPoller::new(
            format!("http://{addr}/events"),
            Duration::from_secs(2),
            Surface::Auction,
        )
        .unwrap();

        poller.poll().await.unwrap();
        poller.poll().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_none());
        assert!(seen[1].is_some());
    }
}
