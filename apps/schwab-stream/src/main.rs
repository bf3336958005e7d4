//! Schwab Stream Binary
//!
//! Runs one trading day's quote capture session and exits when the session
//! window closes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin schwab-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `SCHWAB_CLIENT_ID`, `SCHWAB_CLIENT_SECRET`, `SCHWAB_REFRESH_TOKEN`:
//!   market-data OAuth credentials
//!
//! ## Optional
//! - `SCHWAB_TRADE_CLIENT_ID`, `SCHWAB_TRADE_CLIENT_SECRET`,
//!   `SCHWAB_TRADE_REFRESH_TOKEN`: trader OAuth credentials (all or none)
//! - `STREAM_STRIKE_RANGE` / `STREAM_STRIKE_STEP`: strike grid (default: 100 / 5)
//! - `STREAM_SESSION_START` / `STREAM_SESSION_END`: local run window
//!   (default: 06:30 / 13:00)
//! - `CACHE_BACKEND`: redis | memory (default: redis)
//! - `REDIS_URL`: cache URL (default: <redis://127.0.0.1:6379/0>)
//! - `PARQUET_DIR`: partition directory (default: ./parquet)
//! - `MONITOR_ENABLED`: run the freshness monitor (default: true)
//! - `ALERT_WEBHOOK_URL`: alert webhook; alerts are logged when unset
//! - `STREAM_HEALTH_PORT`: health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use schwab_stream::application::ports::{
    ConnectionRunner, Notifier, PartitionReader, QuoteCache, QuoteLog,
};
use schwab_stream::infrastructure::alert::{LogNotifier, WebhookNotifier};
use schwab_stream::infrastructure::cache::{MemoryQuoteCache, RedisQuoteCache};
use schwab_stream::infrastructure::schwab::{
    OAuthClient, SchwabCredentialProvider, SchwabRestClient, StreamClient, StreamClientConfig,
};
use schwab_stream::infrastructure::storage::{ParquetPartitionReader, ParquetQuoteLog};
use schwab_stream::infrastructure::telemetry;
use schwab_stream::{
    CacheBackend, FreshnessMonitor, HealthServer, HealthServerState, SessionController,
    SharedStreamState, StreamConfig, TickSink, Watchdog, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for background tasks to stop after the session ends.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Schwab stream");

    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Alerts
    let notifier: Arc<dyn Notifier> = match &config.alert_webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone(), config.api.timeout)
                .context("failed to build alert webhook client")?,
        ),
        None => Arc::new(LogNotifier::new()),
    };

    // Sinks
    let cache: Arc<dyn QuoteCache> = match config.sinks.cache_backend {
        CacheBackend::Redis => Arc::new(
            RedisQuoteCache::connect(
                &config.sinks.redis_url,
                &config.sinks.cache_namespace,
                config.sinks.cache_ttl,
            )
            .await
            .context("failed to connect to Redis")?,
        ),
        CacheBackend::Memory => Arc::new(MemoryQuoteCache::new(
            &config.sinks.cache_namespace,
            config.sinks.cache_ttl,
        )),
    };
    let log: Arc<dyn QuoteLog> = Arc::new(ParquetQuoteLog::new(
        config.sinks.parquet_dir.clone(),
        config.sinks.batch_size,
    ));
    let partitions: Arc<dyn PartitionReader> =
        Arc::new(ParquetPartitionReader::new(config.sinks.parquet_dir.clone()));
    let sink = TickSink::new(Arc::clone(&cache), log);

    // Schwab clients
    let api = Arc::new(SchwabRestClient::new(&config.api).context("failed to build REST client")?);
    let data_oauth = OAuthClient::new(&config.api, config.data_credentials.clone())
        .context("failed to build OAuth client")?;
    let trade_oauth = config
        .trade_credentials
        .clone()
        .map(|creds| OAuthClient::new(&config.api, creds))
        .transpose()
        .context("failed to build trader OAuth client")?;
    let credentials = Arc::new(SchwabCredentialProvider::new(data_oauth, trade_oauth));

    let state = Arc::new(SharedStreamState::new());
    let runner: Arc<dyn ConnectionRunner> = Arc::new(StreamClient::new(
        StreamClientConfig::from_config(&config),
        credentials,
        api,
        Arc::clone(&notifier),
        Arc::clone(&state),
        sink.clone(),
    ));

    let watchdog = Watchdog::new(
        Arc::clone(&state),
        config.stream.thresholds(),
        config.stream.watchdog_interval,
    );
    let controller = SessionController::new(
        config.session_window()?,
        runner,
        watchdog,
        sink,
        config.stream.backoff,
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&state),
        config.stream.no_data_threshold,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Freshness monitor
    let monitor_task = if config.monitor.enabled {
        let monitor = FreshnessMonitor::new(
            cache,
            partitions,
            notifier,
            config.freshness_criteria(),
            config.monitor.poll_interval,
        );
        Some(tokio::spawn(monitor.run(shutdown_token.clone())))
    } else {
        tracing::info!("Freshness monitor disabled");
        None
    };

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        await_signal().await;
        signal_token.cancel();
    });

    let summary = controller.run(shutdown_token.child_token()).await;
    tracing::info!(
        end = ?summary.end,
        attempts = summary.attempts,
        failures = summary.failures,
        "Session complete"
    );

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let background = async {
        if let Some(task) = monitor_task {
            let _ = task.await;
        }
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, background).await.is_err() {
        tracing::warn!("Background tasks did not stop in time");
    }

    tracing::info!("Schwab stream stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        underlying = %config.grid.underlying,
        option_root = %config.grid.option_root,
        strike_range = config.grid.strike_range,
        strike_step = config.grid.strike_step,
        session_start = %config.stream.session_start,
        session_end = %config.stream.session_end,
        cache_backend = config.sinks.cache_backend.as_str(),
        health_port = config.server.health_port,
        trade_credentials = config.trade_credentials.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        parquet_dir = %config.sinks.parquet_dir,
        batch_size = config.sinks.batch_size,
        monitor_enabled = config.monitor.enabled,
        alert_webhook = config.alert_webhook_url.is_some(),
        "Sink configuration"
    );
}

/// Wait for SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn await_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
