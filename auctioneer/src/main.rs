mod config;

use clap::Parser;
use config::{Config, MetricsConfig};
use currency::{CurrencyConverter, ReqwestGet};
use metrics_exporter_statsd::StatsdBuilder;
use shared::refresh::Refresher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stored_requests::config::StoredRequestsConfig;
use stored_requests::events::{self, CacheEvent};
use stored_requests::fetcher::{
    self, CachedFetcher, EmptyFetcher, Fetcher, FilesystemFetcher, HttpFetcher, PostgresFetcher,
};
use stored_requests::{InMemoryCache, Surface};
use tokio::sync::mpsc;
use tracing::info;

// The plain HTTP fetch backend has no timeout knob of its own.
const HTTP_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "auctioneer", about = "Real-time bid auction server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "auctioneer.yaml")]
    config: PathBuf,
    /// Directory holding stored payloads when the filesystem backend is
    /// selected.
    #[arg(long, default_value = "stored_requests/data")]
    stored_data_dir: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("could not connect to postgres: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not install metrics recorder: {0}")]
    Metrics(String),

    #[error(transparent)]
    Currency(#[from] currency::AlreadyRunning),
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        std::process::exit(1);
    }

    let _sentry_guard = config.common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    if let Err(err) = rt.block_on(run(cli, config)) {
        eprintln!("failed to start: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> Result<(), StartupError> {
    if let Some(metrics_config) = &config.common.metrics {
        install_metrics(metrics_config)?;
    }
    shared::metrics_defs::register_all(shared::metrics_defs::ALL_METRICS);
    shared::metrics_defs::register_all(stored_requests::metrics_defs::ALL_METRICS);

    let mut refreshers: Vec<Refresher> = Vec::new();
    let mut admin_router = axum::Router::new();

    let mut converter = None;
    if let Some(currency_config) = &config.currency {
        let client = Arc::new(ReqwestGet::new(Duration::from_millis(
            currency_config.timeout_ms,
        ))?);
        let mut currency_converter = CurrencyConverter::new(
            currency_config.source_url.as_str(),
            Duration::from_secs(currency_config.refresh_rate_seconds),
            client,
        );
        currency_converter.start()?;
        info!(source = %currency_config.source_url, "currency rate sync started");
        converter = Some(currency_converter);
    }

    if let Some(stored) = &config.stored_requests {
        admin_router =
            build_stored_requests(stored, &cli.stored_data_dir, &mut refreshers, admin_router)
                .await?;
    }

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.admin_listener.host, config.admin_listener.port
    ))
    .await?;
    info!(host = %config.admin_listener.host, port = config.admin_listener.port, "admin listener ready");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, admin_router).await {
            tracing::error!(error = %err, "admin server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for refresher in &mut refreshers {
        refresher.stop().await;
    }
    if let Some(mut converter) = converter {
        converter.stop().await;
    }
    Ok(())
}

/// Wires one cache, fetcher, and set of event producers per surface, and
/// mounts the lookup API (plus the events API when enabled).
async fn build_stored_requests(
    config: &StoredRequestsConfig,
    data_dir: &Path,
    refreshers: &mut Vec<Refresher>,
    mut router: axum::Router,
) -> Result<axum::Router, StartupError> {
    let pool = match &config.postgres {
        Some(postgres) => Some(fetcher::connect(&postgres.connection.conn_string()).await?),
        None => None,
    };

    let mut lookup_fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();
    let mut event_senders: Vec<mpsc::Sender<CacheEvent>> = Vec::new();

    for surface in Surface::ALL {
        let backend: Arc<dyn Fetcher> = if config.filesystem {
            Arc::new(FilesystemFetcher::new(data_dir))
        } else if let (Some(postgres), Some(pool)) = (&config.postgres, &pool) {
            Arc::new(PostgresFetcher::new(
                pool.clone(),
                postgres.queries.clone(),
                surface,
            ))
        } else if let Some(http) = &config.http {
            Arc::new(HttpFetcher::new(http.endpoint(surface), HTTP_FETCH_TIMEOUT)?)
        } else {
            Arc::new(EmptyFetcher)
        };

        match &config.in_memory_cache {
            Some(cache_config) => {
                let cache = Arc::new(InMemoryCache::new(cache_config));
                lookup_fetchers.push(Arc::new(CachedFetcher::new(backend, cache.clone())));

                let (events_tx, events_rx) = mpsc::channel(64);
                // Detached: the listener drains until every sender is gone.
                let _ = events::spawn_listener(cache, events_rx);

                if let (Some(pool), Some(polling)) = (
                    &pool,
                    config.postgres.as_ref().and_then(|p| p.update_polling.as_ref()),
                ) {
                    let poller = events::postgres::PostgresPoller::new(pool.clone(), polling, surface);
                    refreshers.push(events::spawn_source(
                        poller,
                        Duration::from_secs(polling.refresh_rate_seconds),
                        events_tx.clone(),
                    ));
                }

                if let Some(http_events) = &config.http_events {
                    let poller = events::http::HttpEventsPoller::new(
                        http_events.endpoint(surface),
                        Duration::from_millis(http_events.timeout_ms),
                        surface,
                    )?;
                    refreshers.push(events::spawn_source(
                        poller,
                        Duration::from_secs(http_events.refresh_rate_seconds),
                        events_tx.clone(),
                    ));
                }

                event_senders.push(events_tx);
            }
            None => lookup_fetchers.push(backend),
        }
    }

    let amp_fetcher = lookup_fetchers.pop().unwrap_or_else(|| Arc::new(EmptyFetcher));
    let auction_fetcher = lookup_fetchers.pop().unwrap_or_else(|| Arc::new(EmptyFetcher));
    router = router.merge(stored_requests::api::router(auction_fetcher, amp_fetcher));

    if config.cache_events_api
        && let (Some(auction_tx), Some(amp_tx)) = (event_senders.first(), event_senders.get(1))
    {
        router = router.merge(events::api::router(auction_tx.clone(), amp_tx.clone()));
    }

    Ok(router)
}

fn install_metrics(config: &MetricsConfig) -> Result<(), StartupError> {
    let recorder = StatsdBuilder::from(&config.statsd_host, config.statsd_port)
        .build(Some("auctioneer"))
        .map_err(|err| StartupError::Metrics(err.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|err| StartupError::Metrics(err.to_string()))?;
    Ok(())
}
