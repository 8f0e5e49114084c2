use super::{FetchError, FetchResult, Fetcher};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::time::Duration;

/// Batch-fetches stored payloads from a remote endpoint:
///
/// ```text
/// GET {endpoint}?request-ids=["req-a","req-b"]&imp-ids=["imp-a"]
/// ```
///
/// The response mirrors the request shape; IDs absent from the body are
/// missing. One fetcher instance serves one endpoint, so the auction and
/// AMP surfaces each get their own.
pub struct HttpFetcher {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct StoredBody {
    #[serde(default)]
    requests: HashMap<String, Box<RawValue>>,
    #[serde(default)]
    imps: HashMap<String, Box<RawValue>>,
}

impl HttpFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(HttpFetcher {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<FetchResult, FetchError> {
        if request_ids.is_empty() && imp_ids.is_empty() {
            return Ok(FetchResult::default());
        }

        let mut request = self.client.get(&self.endpoint);
        if !request_ids.is_empty() {
            request = request.query(&[("request-ids", serde_json::to_string(request_ids)?)]);
        }
        if !imp_ids.is_empty() {
            request = request.query(&[("imp-ids", serde_json::to_string(imp_ids)?)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body: StoredBody = serde_json::from_slice(&response.bytes().await?)?;

        let mut result = FetchResult::default();
        for (id, raw) in body.requests {
            result
                .requests
                .insert(id, Bytes::copy_from_slice(raw.get().as_bytes()));
        }
        for (id, raw) in body.imps {
            result
                .imps
                .insert(id, Bytes::copy_from_slice(raw.get().as_bytes()));
        }
        result.fill_missing(request_ids, imp_ids);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn fetches_payloads_and_reports_missing_ids() {
        let app = Router::new().route(
            "/stored",
            get(|| async {
                axum::Json(serde_json::json!({
                    "requests": { "req-a": { "id": "req-a" } },
                    "imps": { "imp-a": { "id": "imp-a" } },
                }))
            }),
        );
        let addr = serve(app).await;

        let fetcher =
            HttpFetcher::new(format!("http://{addr}/stored"), Duration::from_secs(2)).unwrap();
        let result = fetcher
            .fetch(
                &["req-a".to_string(), "req-b".to_string()],
                &["imp-a".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(
            result.requests.get("req-a").unwrap().as_ref(),
            br#"{"id":"req-a"}"#
        );
        assert_eq!(result.missing_requests, vec!["req-b".to_string()]);
        assert!(result.missing_imps.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_fails_the_batch() {
        let addr = serve(Router::new()).await;

        let fetcher =
            HttpFetcher::new(format!("http://{addr}/stored"), Duration::from_secs(2)).unwrap();
        let err = fetcher
            .fetch(&["req-a".to_string()], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(404)));
    }
}
