//! Admin endpoints that update or invalidate cache entries directly.
//!
//! POST saves payloads, DELETE drops IDs. Events go through the same
//! listener channel as every scheduled producer. This is a development
//! tool with no authentication; keep it off public networks.

use super::{CacheEvent, Invalidation, Update};
use crate::Surface;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Clone)]
struct ApiState {
    auction: mpsc::Sender<CacheEvent>,
    amp: mpsc::Sender<CacheEvent>,
}

impl ApiState {
    fn sender(&self, surface: &str) -> Option<&mpsc::Sender<CacheEvent>> {
        if surface == Surface::Auction.as_str() {
            Some(&self.auction)
        } else if surface == Surface::Amp.as_str() {
            Some(&self.amp)
        } else {
            None
        }
    }
}

/// Wire format for POST bodies; payloads stay raw.
#[derive(Deserialize)]
struct SaveBody {
    #[serde(default)]
    requests: HashMap<String, Box<RawValue>>,
    #[serde(default)]
    imps: HashMap<String, Box<RawValue>>,
}

pub fn router(auction: mpsc::Sender<CacheEvent>, amp: mpsc::Sender<CacheEvent>) -> Router {
    Router::new()
        .route("/storedrequests/{surface}", post(save).delete(invalidate))
        .with_state(ApiState { auction, amp })
}

async fn save(
    State(state): State<ApiState>,
    Path(surface): Path<String>,
    Json(body): Json<SaveBody>,
) -> StatusCode {
    let Some(sender) = state.sender(&surface) else {
        return StatusCode::NOT_FOUND;
    };

    let mut update = Update::default();
    for (id, raw) in body.requests {
        update
            .requests
            .insert(id, Bytes::copy_from_slice(raw.get().as_bytes()));
    }
    for (id, raw) in body.imps {
        update
            .imps
            .insert(id, Bytes::copy_from_slice(raw.get().as_bytes()));
    }

    if sender.send(CacheEvent::Save(update)).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

async fn invalidate(
    State(state): State<ApiState>,
    Path(surface): Path<String>,
    Json(invalidation): Json<Invalidation>,
) -> StatusCode {
    let Some(sender) = state.sender(&surface) else {
        return StatusCode::NOT_FOUND;
    };

    if sender
        .send(CacheEvent::Invalidate(invalidation))
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn post_produces_a_save_event() {
        let (auction_tx, mut auction_rx) = mpsc::channel(16);
        let (amp_tx, _amp_rx) = mpsc::channel(16);
        let app = router(auction_tx, amp_tx);

        let response = app
            .oneshot(request(
                "POST",
                "/storedrequests/openrtb2",
                r#"{"requests":{"req-a":{"id":"req-a"}},"imps":{}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = auction_rx.recv().await.unwrap();
        match event {
            CacheEvent::Save(update) => {
                assert!(update.requests.contains_key("req-a"));
                assert!(update.imps.is_empty());
            }
            other => panic!("expected a save event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_produces_an_invalidation_on_the_amp_channel() {
        let (auction_tx, _auction_rx) = mpsc::channel(16);
        let (amp_tx, mut amp_rx) = mpsc::channel(16);
        let app = router(auction_tx, amp_tx);

        let response = app
            .oneshot(request(
                "DELETE",
                "/storedrequests/amp",
                r#"{"requests":["req-a"],"imps":["imp-a"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = amp_rx.recv().await.unwrap();
        match event {
            CacheEvent::Invalidate(invalidation) => {
                assert_eq!(invalidation.requests, vec!["req-a".to_string()]);
                assert_eq!(invalidation.imps, vec!["imp-a".to_string()]);
            }
            other => panic!("expected an invalidation event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_surfaces_are_not_found() {
        let (auction_tx, _auction_rx) = mpsc::channel(16);
        let (amp_tx, _amp_rx) = mpsc::channel(16);
        let app = router(auction_tx, amp_tx);

        let response = app
            .oneshot(request("POST", "/storedrequests/video", r#"{}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
