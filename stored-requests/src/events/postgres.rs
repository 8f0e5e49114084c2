//! Update polling against the fetch database.
//!
//! The first poll runs the configured init query and loads everything; it
//! tolerates no prior watermark. Every later poll binds the watermark as
//! `$1` and applies the returned rows as deltas. Rows are read positionally
//! as `(id, data, type, last_updated)`: the discriminator routes each row
//! to its category, and a NULL or empty payload drops the entry instead of
//! saving it.

use super::{CacheEvent, EventError, EventSource, Invalidation, Update};
use crate::Surface;
use crate::config::PostgresEventsConfig;
use crate::metrics_defs::POLL_ROWS;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use shared::histogram;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;

pub struct PostgresPoller {
    pool: PgPool,
    init_query: String,
    update_query: String,
    timeout: Duration,
    surface: Surface,
    watermark: Option<DateTime<Utc>>,
}

impl PostgresPoller {
    pub fn new(pool: PgPool, config: &PostgresEventsConfig, surface: Surface) -> Self {
        PostgresPoller {
            pool,
            init_query: config.init_query(surface).to_string(),
            update_query: config.update_query(surface).to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
            surface,
            watermark: None,
        }
    }

    async fn run(&self, query: Query<'_, Postgres, PgArguments>) -> Result<Vec<PgRow>, EventError> {
        match tokio::time::timeout(self.timeout, query.fetch_all(&self.pool)).await {
            Ok(rows) => Ok(rows?),
            Err(_) => Err(EventError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl EventSource for PostgresPoller {
    fn name(&self) -> &'static str {
        match self.surface {
            Surface::Auction => "postgres-poll-openrtb2",
            Surface::Amp => "postgres-poll-amp",
        }
    }

    async fn poll(&mut self) -> Result<Vec<CacheEvent>, EventError> {
        let started = Utc::now();

        let rows = match self.watermark {
            None => self.run(sqlx::query(&self.init_query)).await?,
            Some(watermark) => {
                self.run(sqlx::query(&self.update_query).bind(watermark))
                    .await?
            }
        };
        histogram!(POLL_ROWS).record(rows.len() as f64);

        let (events, newest) = route_rows(&rows)?;

        // An empty init batch still needs a watermark for the next tick;
        // the poll start time is the conservative choice.
        if self.watermark.is_none() {
            self.watermark = Some(newest.unwrap_or(started));
        } else {
            self.watermark = advance(self.watermark, newest);
        }

        Ok(events)
    }
}

// The watermark never regresses; an empty batch leaves it unchanged.
fn advance(
    current: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, newest) {
        (Some(current), Some(newest)) if newest > current => Some(newest),
        (None, newest) => newest,
        (current, _) => current,
    }
}

fn route_rows(rows: &[PgRow]) -> Result<(Vec<CacheEvent>, Option<DateTime<Utc>>), EventError> {
    let mut update = Update::default();
    let mut invalidation = Invalidation::default();
    let mut newest: Option<DateTime<Utc>> = None;

    for row in rows {
        let id: String = row.try_get(0)?;
        let data: Option<String> = row.try_get(1)?;
        let kind: String = row.try_get(2)?;
        let updated_at: DateTime<Utc> = row.try_get(3)?;

        if newest.is_none_or(|n| updated_at > n) {
            newest = Some(updated_at);
        }

        let deleted = data.as_deref().is_none_or(str::is_empty);
        match (kind.as_str(), deleted) {
            ("request", false) => {
                update
                    .requests
                    .insert(id, Bytes::from(data.unwrap_or_default().into_bytes()));
            }
            ("request", true) => invalidation.requests.push(id),
            ("imp", false) => {
                update
                    .imps
                    .insert(id, Bytes::from(data.unwrap_or_default().into_bytes()));
            }
            ("imp", true) => invalidation.imps.push(id),
            (other, _) => {
                tracing::warn!(id = %id, kind = other, "stored row with unknown type");
            }
        }
    }

    let mut events = Vec::new();
    if !update.is_empty() {
        events.push(CacheEvent::Save(update));
    }
    if !invalidation.is_empty() {
        events.push(CacheEvent::Invalidate(invalidation));
    }
    Ok((events, newest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn watermark_never_regresses() {
        assert_eq!(advance(Some(at(100)), Some(at(200))), Some(at(200)));
        assert_eq!(advance(Some(at(200)), Some(at(100))), Some(at(200)));
        assert_eq!(advance(Some(at(200)), Some(at(200))), Some(at(200)));
    }

    #[test]
    fn empty_batches_leave_the_watermark_unchanged() {
        assert_eq!(advance(Some(at(100)), None), Some(at(100)));
        assert_eq!(advance(None, None), None);
    }
}
