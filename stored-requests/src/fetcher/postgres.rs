use super::{FetchError, FetchResult, Fetcher};
use crate::Surface;
use crate::config::PostgresFetcherQueries;
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

pub async fn connect(conn_string: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(conn_string)
        .await
}

/// Fetches a whole batch with one templated query. Rows come back as
/// `(id, data, type)` read positionally, the discriminator routing each row
/// to its category.
pub struct PostgresFetcher {
    pool: PgPool,
    queries: PostgresFetcherQueries,
    surface: Surface,
}

impl PostgresFetcher {
    pub fn new(pool: PgPool, queries: PostgresFetcherQueries, surface: Surface) -> Self {
        PostgresFetcher {
            pool,
            queries,
            surface,
        }
    }
}

#[async_trait]
impl Fetcher for PostgresFetcher {
    async fn fetch(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<FetchResult, FetchError> {
        if request_ids.is_empty() && imp_ids.is_empty() {
            return Ok(FetchResult::default());
        }

        let resolved =
            self.queries
                .make_query(self.surface, request_ids.len() as i64, imp_ids.len() as i64);
        for diagnostic in &resolved.diagnostics {
            tracing::warn!(surface = self.surface.as_str(), "{diagnostic}");
        }

        // Bind order must mirror placeholder numbering: all request IDs
        // first, then all imp IDs.
        let mut query = sqlx::query(&resolved.sql);
        for id in request_ids.iter().chain(imp_ids.iter()) {
            query = query.bind(id.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut result = FetchResult::default();
        for row in &rows {
            let id: String = row.try_get(0)?;
            let data: String = row.try_get(1)?;
            let kind: String = row.try_get(2)?;
            match kind.as_str() {
                "request" => {
                    result.requests.insert(id, Bytes::from(data.into_bytes()));
                }
                "imp" => {
                    result.imps.insert(id, Bytes::from(data.into_bytes()));
                }
                other => {
                    tracing::warn!(id = %id, kind = other, "stored row with unknown type");
                }
            }
        }
        result.fill_missing(request_ids, imp_ids);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_batches_skip_the_database() {
        // A lazy pool never connects; fetch must return before touching it.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let fetcher = PostgresFetcher::new(pool, PostgresFetcherQueries::default(), Surface::Auction);

        let result = fetcher.fetch(&[], &[]).await.unwrap();
        assert_eq!(result, FetchResult::default());
    }
}
