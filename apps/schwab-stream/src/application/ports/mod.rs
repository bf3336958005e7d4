//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteCache`: ephemeral keyed cache with per-key expiry
//! - `QuoteLog`: durable batched append log
//! - `PartitionReader`: read-back of one day's durable partition
//! - `MarketDataApi`: REST quote and user-preference retrieval
//! - `CredentialProvider`: short-lived data token and long-lived trade token
//! - `Notifier`: fire-and-forget alert channel
//!
//! ## Driver Ports (Inbound)
//!
//! - `ConnectionRunner`: one physical streaming connection, run to completion

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::domain::quote::QuoteRecord;
use crate::domain::symbols::StrikeGridError;

// =============================================================================
// Errors
// =============================================================================

/// Sink read or write failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Cache backend failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// Durable storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// REST call failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The access token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Non-success status other than 401.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Body did not have the expected shape.
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Credential refresh failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// The token endpoint rejected the refresh credential.
    #[error("refresh rejected: {0}")]
    Rejected(String),

    /// Every retry failed.
    #[error("credential refresh failed after {attempts} attempts: {last_error}")]
    RefreshExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last failure observed.
        last_error: String,
    },
}

/// Why a connection attempt ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Credential refresh failed.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Reference price or streamer info could not be fetched.
    #[error("REST error: {0}")]
    Api(#[from] ApiError),

    /// The subscription grid could not be built.
    #[error("strike grid error: {0}")]
    Grid(#[from] StrikeGridError),

    /// The feed reported a fatal protocol fault.
    #[error("protocol fault: {0}")]
    Protocol(String),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No keep-alive response within the bounded wait.
    #[error("keep-alive timeout")]
    KeepAliveTimeout,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,
}

impl ConnectionError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::Api(_) => "api",
            Self::Grid(_) => "grid",
            Self::Protocol(_) => "protocol",
            Self::Transport(_) => "transport",
            Self::KeepAliveTimeout => "keep_alive_timeout",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Streamer Info
// =============================================================================

/// Streaming endpoint and client identity returned by user preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerInfo {
    /// Push-feed socket URL.
    pub socket_url: String,
    /// Client customer id.
    pub customer_id: String,
    /// Client correlation id.
    pub correl_id: String,
    /// Client channel.
    pub channel: String,
    /// Client function id.
    pub function_id: String,
}

// =============================================================================
// Driven Ports
// =============================================================================

/// Ephemeral per-symbol cache with per-key expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteCache: Send + Sync {
    /// Overwrite the entry for the record's symbol and restart its TTL.
    async fn upsert(&self, record: &QuoteRecord) -> Result<(), SinkError>;

    /// Latest unexpired record for a symbol.
    async fn latest(&self, symbol: &str) -> Result<Option<QuoteRecord>, SinkError>;

    /// All unexpired records whose symbol starts with `symbol_prefix`.
    async fn scan(&self, symbol_prefix: &str) -> Result<Vec<QuoteRecord>, SinkError>;
}

/// Durable, day-partitioned append log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteLog: Send + Sync {
    /// Buffer a record, flushing when the batch fills or the date rolls.
    async fn append(&self, record: QuoteRecord) -> Result<(), SinkError>;

    /// Flush everything buffered.
    async fn flush(&self) -> Result<(), SinkError>;
}

/// Read access to flushed partitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PartitionReader: Send + Sync {
    /// All records of one calendar day's partition. Missing is empty.
    async fn read_partition(&self, date: NaiveDate) -> Result<Vec<QuoteRecord>, SinkError>;
}

/// Market-data and trader REST endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Last price of a single symbol.
    async fn underlying_price(&self, symbol: &str, access_token: &str) -> Result<f64, ApiError>;

    /// Streaming endpoint and client identity.
    async fn streamer_info(&self, access_token: &str) -> Result<StreamerInfo, ApiError>;
}

/// Access-token source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Exchange the data refresh credential for a new access token.
    async fn refresh_data_token(&self) -> Result<String, CredentialError>;

    /// Long-lived trade access token for the login envelope.
    async fn trade_token(&self) -> Result<String, CredentialError>;
}

/// Fire-and-forget alert channel. Never fails.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert, falling back to local logging on failure.
    async fn notify(&self, subject: &str, body: &str);
}

// =============================================================================
// Driver Ports
// =============================================================================

/// One physical streaming connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionRunner: Send + Sync {
    /// Connect, subscribe, and dispatch until `stop` fires or the connection
    /// ends. A requested stop (session end or watchdog) returns `Ok`.
    async fn run_connection(&self, stop: CancellationToken) -> Result<(), ConnectionError>;
}
