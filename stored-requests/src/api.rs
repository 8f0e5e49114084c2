//! Read-side lookup endpoints.
//!
//! Serves stored payloads over the same wire format `fetcher::HttpFetcher`
//! consumes, which is also the seam the bid endpoints read through:
//!
//! ```text
//! GET /storeddata/{surface}?request-ids=["req-a"]&imp-ids=["imp-a"]
//! ```
//!
//! Responses are always 200 with whatever was found; missing IDs are simply
//! absent from the body, and the caller decides what that means.

use crate::fetcher::Fetcher;
use crate::{FetchError, Surface};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
struct LookupState {
    auction: Arc<dyn Fetcher>,
    amp: Arc<dyn Fetcher>,
}

#[derive(Deserialize)]
struct Params {
    #[serde(rename = "request-ids")]
    request_ids: Option<String>,
    #[serde(rename = "imp-ids")]
    imp_ids: Option<String>,
}

#[derive(Serialize)]
struct LookupResponse {
    requests: HashMap<String, Box<RawValue>>,
    imps: HashMap<String, Box<RawValue>>,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

pub fn router(auction: Arc<dyn Fetcher>, amp: Arc<dyn Fetcher>) -> Router {
    Router::new()
        .route("/storeddata/{surface}", get(lookup))
        .with_state(LookupState { auction, amp })
}

async fn lookup(
    State(state): State<LookupState>,
    Path(surface): Path<String>,
    Query(params): Query<Params>,
) -> Response {
    let fetcher = if surface == Surface::Auction.as_str() {
        &state.auction
    } else if surface == Surface::Amp.as_str() {
        &state.amp
    } else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let request_ids = match parse_ids(params.request_ids.as_deref()) {
        Ok(ids) => ids,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let imp_ids = match parse_ids(params.imp_ids.as_deref()) {
        Ok(ids) => ids,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match fetch_payloads(fetcher.as_ref(), &request_ids, &imp_ids).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            tracing::error!(surface = %surface, error = %err, "stored request lookup failed");
            ApiErrorResponse {
                error_message: err.to_string(),
            }
            .into_response()
        }
    }
}

// IDs arrive as a JSON string array to match the fetcher wire format.
fn parse_ids(raw: Option<&str>) -> Result<Vec<String>, serde_json::Error> {
    match raw {
        Some(raw) => serde_json::from_str(raw),
        None => Ok(Vec::new()),
    }
}

async fn fetch_payloads(
    fetcher: &dyn Fetcher,
    request_ids: &[String],
    imp_ids: &[String],
) -> Result<LookupResponse, FetchError> {
    let result = fetcher.fetch(request_ids, imp_ids).await?;
    Ok(LookupResponse {
        requests: into_raw(result.requests)?,
        imps: into_raw(result.imps)?,
    })
}

fn into_raw(payloads: HashMap<String, Bytes>) -> Result<HashMap<String, Box<RawValue>>, FetchError> {
    payloads
        .into_iter()
        .map(|(id, data)| {
            let text = String::from_utf8_lossy(&data).into_owned();
            Ok((id, RawValue::from_string(text)?))
        })
        .collect()
}
