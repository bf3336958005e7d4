#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Schwab Stream - Real-time SPX Quote Capture
//!
//! Holds one push-feed connection to the Schwab streamer during the trading
//! day, subscribes to a same-day strike grid of index options around the
//! underlying plus the underlying itself, and writes every accepted tick to
//! an ephemeral Redis cache and a day-partitioned Parquet log.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `quote`: The normalized tick record
//!   - `symbols`: Strike-grid option symbol generation
//!   - `session`: Daily run window
//!   - `liveness`: Connection state and watchdog assessment
//!   - `freshness`: Sink freshness and two-strikes alerting
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Sinks, REST, credentials, alerts, connection runner
//!   - `services`: Session controller, watchdog, tick sink, freshness monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `schwab`: OAuth, REST, push-feed codec and stream client
//!   - `cache`: Redis and in-memory quote caches
//!   - `storage`: Parquet day partitions
//!   - `alert`: Webhook and log notifiers
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐     ┌──────────┐
//! Schwab streamer ────►│ StreamClient │────►│ TickSink │──┬──► Redis cache
//!                      └──────┬───────┘     └──────────┘  └──► Parquet log
//!                             │                                    │
//!                      ┌──────┴───────┐               ┌────────────┴─────┐
//!                      │   Watchdog   │               │ FreshnessMonitor │──► Notifier
//!                      └──────────────┘               └──────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core quote-capture types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::freshness::{AlertGate, FreshnessCriteria, FreshnessReport};
pub use domain::liveness::{ConnectionState, LivenessThresholds, ReconnectReason};
pub use domain::quote::{QuoteFields, QuoteRecord};
pub use domain::session::SessionWindow;
pub use domain::symbols::OptionSymbolGenerator;

// Ports
pub use application::ports::{
    ApiError, ConnectionError, ConnectionRunner, CredentialError, CredentialProvider,
    MarketDataApi, Notifier, PartitionReader, QuoteCache, QuoteLog, SinkError, StreamerInfo,
};

// Services
pub use application::services::{
    FreshnessMonitor, SessionController, SessionEnd, SessionSummary, SharedStreamState,
    StreamSnapshot, TickSink, Watchdog,
};

// Infrastructure config
pub use infrastructure::config::{
    ApiSettings, CacheBackend, ConfigError, GridSettings, MonitorSettings, OAuthCredentials,
    ServerSettings, SinkSettings, StreamConfig, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
