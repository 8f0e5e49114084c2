//! Configuration for the stored-request subsystem.
//!
//! Every optional feature is an `Option` block; absence of a feature is
//! never an error by itself. `StoredRequestsConfig::validate` is called once
//! at startup and the process refuses to start on any inconsistency.

use crate::Surface;
use crate::query::{self, ResolvedQuery};
use serde::Deserialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("stored_requests.cache_events_api requires a configured in_memory_cache")]
    EventsApiWithoutCache,

    #[error("stored_requests.http_events requires a configured in_memory_cache")]
    HttpEventsWithoutCache,

    #[error("stored_requests.postgres.update_polling requires a configured in_memory_cache")]
    PollingWithoutCache,

    #[error(
        "stored_requests backends are mutually exclusive, but both {first} and {second} are configured"
    )]
    ConflictingBackends {
        first: &'static str,
        second: &'static str,
    },

    #[error(
        "in-memory caches do not support a TTL without max sizes. Given: ttl_seconds={ttl}, request_cache_size_bytes={request_size}, imp_cache_size_bytes={imp_size}"
    )]
    TtlWithoutSize {
        ttl: i64,
        request_size: i64,
        imp_size: i64,
    },

    #[error("stored_requests.postgres.update_polling.{query} must not contain any wildcards")]
    InitQueryWithWildcard { query: &'static str },

    #[error(
        "stored_requests.postgres.update_polling.{query} must contain exactly one wildcard, $1"
    )]
    UpdateQueryWildcards { query: &'static str },
}

/// Selects where stored requests come from and how they are cached.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StoredRequestsConfig {
    /// Load stored payloads from files named by ID.
    #[serde(default)]
    pub filesystem: bool,
    /// Fetch stored payloads from a Postgres database, optionally keeping
    /// the cache current through update polling.
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    /// Fetch stored payloads from remote HTTP endpoints.
    #[serde(default)]
    pub http: Option<HttpFetcherConfig>,
    /// Keep fetched payloads in a bounded in-memory cache.
    #[serde(default)]
    pub in_memory_cache: Option<InMemoryCacheConfig>,
    /// Expose endpoints that update or invalidate cache entries directly.
    /// A development tool; it has no authentication and must not be exposed
    /// to public networks.
    #[serde(default)]
    pub cache_events_api: bool,
    /// Populate and update the cache from remote HTTP endpoints.
    #[serde(default)]
    pub http_events: Option<HttpEventsConfig>,
}

impl StoredRequestsConfig {
    /// Checks the tree for internal consistency. Rules run in a fixed
    /// order and the first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.in_memory_cache.is_none() {
            if self.cache_events_api {
                return Err(ConfigError::EventsApiWithoutCache);
            }
            if self.http_events.is_some() {
                return Err(ConfigError::HttpEventsWithoutCache);
            }
            if let Some(postgres) = &self.postgres
                && postgres.update_polling.is_some()
            {
                return Err(ConfigError::PollingWithoutCache);
            }
        }

        self.validate_backend_choice()?;

        if let Some(cache) = &self.in_memory_cache {
            cache.validate()?;
        }

        if let Some(postgres) = &self.postgres
            && let Some(polling) = &postgres.update_polling
        {
            polling.validate()?;
        }

        Ok(())
    }

    // The backends do not compose: a fallback chain would blur "fetch
    // failed" and "ID does not exist", so exactly one source may be active.
    fn validate_backend_choice(&self) -> Result<(), ConfigError> {
        let mut selected = Vec::new();
        if self.filesystem {
            selected.push("filesystem");
        }
        if self.postgres.is_some() {
            selected.push("postgres");
        }
        if self.http.is_some() {
            selected.push("http");
        }

        if selected.len() > 1 {
            return Err(ConfigError::ConflictingBackends {
                first: selected[0],
                second: selected[1],
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PostgresConfig {
    pub connection: PostgresConnection,
    pub queries: PostgresFetcherQueries,
    #[serde(default)]
    pub update_polling: Option<PostgresEventsConfig>,
}

/// Connection options assembled into a libpq-style string. See
/// <https://www.postgresql.org/docs/current/libpq-connect.html#LIBPQ-PARAMKEYWORDS>.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostgresConnection {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl PostgresConnection {
    /// Emits `key=value` pairs in a fixed order, skipping unset fields
    /// entirely. `sslmode=disable` is always appended.
    pub fn conn_string(&self) -> String {
        let mut parts = Vec::new();
        if !self.host.is_empty() {
            parts.push(format!("host={}", self.host));
        }
        if self.port > 0 {
            parts.push(format!("port={}", self.port));
        }
        if !self.user.is_empty() {
            parts.push(format!("user={}", self.user));
        }
        if !self.password.is_empty() {
            parts.push(format!("password={}", self.password));
        }
        if !self.dbname.is_empty() {
            parts.push(format!("dbname={}", self.dbname));
        }
        parts.push("sslmode=disable".to_string());
        parts.join(" ")
    }
}

/// Fetch-query templates, one per surface. In the simplest case:
///
/// ```sql
/// SELECT id, requestData, 'request' AS type
///   FROM stored_requests WHERE id IN %REQUEST_ID_LIST%
/// UNION ALL
/// SELECT id, impData, 'imp' AS type
///   FROM stored_imps WHERE id IN %IMP_ID_LIST%
/// ```
///
/// The markers expand to positional placeholder lists sized for the batch;
/// see the `query` module.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostgresFetcherQueries {
    pub openrtb2: String,
    pub amp: String,
}

impl PostgresFetcherQueries {
    pub fn template(&self, surface: Surface) -> &str {
        match surface {
            Surface::Auction => &self.openrtb2,
            Surface::Amp => &self.amp,
        }
    }

    /// Builds a query fetching `num_requests` stored requests and
    /// `num_imps` stored imps for the given surface.
    pub fn make_query(&self, surface: Surface, num_requests: i64, num_imps: i64) -> ResolvedQuery {
        query::resolve(self.template(surface), num_requests, num_imps)
    }
}

/// Update polling against the fetch database. The init queries run once on
/// startup to load everything; the update queries run every refresh tick
/// with the watermark bound as `$1` ("last updated after"). All four must
/// return rows of `(id, data, type, last_updated)`; see `events::postgres`.
#[derive(Clone, Debug, Deserialize)]
pub struct PostgresEventsConfig {
    pub refresh_rate_seconds: u64,
    pub timeout_ms: u64,
    pub openrtb2_init_query: String,
    pub amp_init_query: String,
    pub openrtb2_update_query: String,
    pub amp_update_query: String,
}

impl PostgresEventsConfig {
    /// Init queries take no parameters; update queries take exactly the
    /// watermark. A mismatch would desynchronize placeholder numbering
    /// from the bind list, so both rules are startup errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_init_query("openrtb2_init_query", &self.openrtb2_init_query)?;
        validate_init_query("amp_init_query", &self.amp_init_query)?;
        validate_update_query("openrtb2_update_query", &self.openrtb2_update_query)?;
        validate_update_query("amp_update_query", &self.amp_update_query)?;
        Ok(())
    }

    pub fn init_query(&self, surface: Surface) -> &str {
        match surface {
            Surface::Auction => &self.openrtb2_init_query,
            Surface::Amp => &self.amp_init_query,
        }
    }

    pub fn update_query(&self, surface: Surface) -> &str {
        match surface {
            Surface::Auction => &self.openrtb2_update_query,
            Surface::Amp => &self.amp_update_query,
        }
    }
}

fn validate_init_query(name: &'static str, sql: &str) -> Result<(), ConfigError> {
    if sql.contains('$') {
        return Err(ConfigError::InitQueryWithWildcard { query: name });
    }
    Ok(())
}

fn validate_update_query(name: &'static str, sql: &str) -> Result<(), ConfigError> {
    if !sql.contains("$1") || sql.contains("$2") {
        return Err(ConfigError::UpdateQueryWildcards { query: name });
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpFetcherConfig {
    pub endpoint: String,
    pub amp_endpoint: String,
}

impl HttpFetcherConfig {
    pub fn endpoint(&self, surface: Surface) -> &str {
        match surface {
            Surface::Auction => &self.endpoint,
            Surface::Amp => &self.amp_endpoint,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpEventsConfig {
    pub endpoint: String,
    pub amp_endpoint: String,
    pub refresh_rate_seconds: u64,
    pub timeout_ms: u64,
}

impl HttpEventsConfig {
    pub fn endpoint(&self, surface: Surface) -> &str {
        match surface {
            Surface::Auction => &self.endpoint,
            Surface::Amp => &self.amp_endpoint,
        }
    }
}

/// Sizing for the in-memory cache. All three knobs treat `<= 0` as "off":
/// no expiry, or no byte limit for that category.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct InMemoryCacheConfig {
    #[serde(default)]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub request_cache_size_bytes: i64,
    #[serde(default)]
    pub imp_cache_size_bytes: i64,
}

impl InMemoryCacheConfig {
    // Pure-TTL eviction with no size cap is unsupported; expired entries
    // would pin memory until something touches them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds > 0
            && (self.request_cache_size_bytes <= 0 || self.imp_cache_size_bytes <= 0)
        {
            return Err(ConfigError::TtlWithoutSize {
                ttl: self.ttl_seconds,
                request_size: self.request_cache_size_bytes,
                imp_size: self.imp_cache_size_bytes,
            });
        }
        Ok(())
    }
}
