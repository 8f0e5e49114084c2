use serde::Deserialize;
use std::fs::File;
use stored_requests::config::StoredRequestsConfig;

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Default, Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize)]
pub struct AdminListener {
    pub host: String,
    pub port: u16,
}

impl Default for AdminListener {
    fn default() -> Self {
        AdminListener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Deserialize)]
pub struct CurrencyConfig {
    pub source_url: String,
    #[serde(default = "default_currency_refresh")]
    pub refresh_rate_seconds: u64,
    #[serde(default = "default_currency_timeout")]
    pub timeout_ms: u64,
}

fn default_currency_refresh() -> u64 {
    1800
}

fn default_currency_timeout() -> u64 {
    3000
}

#[derive(Default, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub admin_listener: AdminListener,
    pub stored_requests: Option<StoredRequestsConfig>,
    pub currency: Option<CurrencyConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config = serde_yaml::from_reader(file)?;

        Ok(config)
    }

    /// Startup gate: refuse to run with an inconsistent stored-request
    /// setup. Absent blocks are fine.
    pub fn validate(&self) -> Result<(), stored_requests::config::ConfigError> {
        if let Some(stored) = &self.stored_requests {
            stored.validate()?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
