//! Stream Configuration Settings
//!
//! Configuration types for the stream service, loaded from environment variables.

use std::time::Duration;

use chrono::NaiveTime;

use crate::domain::freshness::FreshnessCriteria;
use crate::domain::liveness::LivenessThresholds;
use crate::domain::session::SessionWindow;

/// OAuth client credentials for one Schwab API app.
#[derive(Clone)]
pub struct OAuthCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl OAuthCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token,
        }
    }

    /// OAuth client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// OAuth client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &"[REDACTED]")
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// REST endpoints and retry behaviour.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// OAuth base URL (token endpoint lives at `/oauth/token`).
    pub oauth_base_url: String,
    /// Market data base URL.
    pub market_data_base_url: String,
    /// Trader base URL.
    pub trader_base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Token refresh attempts before giving up.
    pub refresh_max_attempts: u32,
    /// Delay before the first refresh retry.
    pub refresh_retry_delay: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            oauth_base_url: "https://api.schwabapi.com/v1".to_string(),
            market_data_base_url: "https://api.schwabapi.com/marketdata/v1".to_string(),
            trader_base_url: "https://api.schwabapi.com/trader/v1".to_string(),
            timeout: Duration::from_secs(10),
            refresh_max_attempts: 5,
            refresh_retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Strike grid and subscription settings.
#[derive(Debug, Clone)]
pub struct GridSettings {
    /// Underlying symbol.
    pub underlying: String,
    /// Option root.
    pub option_root: String,
    /// Points above and below the reference price.
    pub strike_range: f64,
    /// Strike spacing.
    pub strike_step: f64,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            underlying: "$SPX".to_string(),
            option_root: "SPXW".to_string(),
            strike_range: 100.0,
            strike_step: 5.0,
        }
    }
}

/// Session, liveness, and keep-alive settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Daily run window start.
    pub session_start: NaiveTime,
    /// Daily run window end.
    pub session_end: NaiveTime,
    /// Fixed delay after a premature disconnect.
    pub backoff: Duration,
    /// Delay between login and subscriptions.
    pub login_settle: Duration,
    /// Silence before the watchdog reconnects.
    pub no_data_threshold: Duration,
    /// Underlying move before the watchdog reconnects.
    pub drift_threshold: f64,
    /// Watchdog period.
    pub watchdog_interval: Duration,
    /// Keep-alive probe interval.
    pub ping_interval: Duration,
    /// Bounded wait for a probe response.
    pub pong_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            session_start: NaiveTime::from_hms_opt(6, 30, 0).unwrap_or_default(),
            session_end: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            backoff: Duration::from_secs(10),
            login_settle: Duration::from_millis(500),
            no_data_threshold: Duration::from_secs(30),
            drift_threshold: 30.0,
            watchdog_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl StreamSettings {
    /// Watchdog thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> LivenessThresholds {
        LivenessThresholds {
            no_data: self.no_data_threshold,
            drift: self.drift_threshold,
        }
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    /// Redis server.
    #[default]
    Redis,
    /// In-process map (local runs and tests).
    Memory,
}

impl CacheBackend {
    /// Parse backend from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            _ => Self::Redis,
        }
    }

    /// Backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Cache and durable log settings.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Cache backend.
    pub cache_backend: CacheBackend,
    /// Redis connection URL.
    pub redis_url: String,
    /// Cache key namespace.
    pub cache_namespace: String,
    /// Cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Partition directory.
    pub parquet_dir: String,
    /// Records buffered before a flush.
    pub batch_size: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            cache_backend: CacheBackend::Redis,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            cache_namespace: "SPX:QUOTE".to_string(),
            cache_ttl: Duration::from_secs(600),
            parquet_dir: "./parquet".to_string(),
            batch_size: 1000,
        }
    }
}

/// Freshness monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Whether the monitor runs.
    pub enabled: bool,
    /// Cache freshness window.
    pub cache_freshness: Duration,
    /// Durable log freshness window.
    pub log_freshness: Duration,
    /// Evaluation period.
    pub poll_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_freshness: Duration::from_secs(60),
            log_freshness: Duration::from_secs(120),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Data API credentials.
    pub data_credentials: OAuthCredentials,
    /// Trade API credentials (`None` in single-API mode).
    pub trade_credentials: Option<OAuthCredentials>,
    /// REST settings.
    pub api: ApiSettings,
    /// Strike grid settings.
    pub grid: GridSettings,
    /// Session and liveness settings.
    pub stream: StreamSettings,
    /// Sink settings.
    pub sinks: SinkSettings,
    /// Monitor settings.
    pub monitor: MonitorSettings,
    /// Alert webhook URL (`None` logs alerts only).
    pub alert_webhook_url: Option<String>,
    /// Server settings.
    pub server: ServerSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// the resulting settings are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_credentials = OAuthCredentials::new(
            required_env("SCHWAB_CLIENT_ID")?,
            required_env("SCHWAB_CLIENT_SECRET")?,
            required_env("SCHWAB_REFRESH_TOKEN")?,
        );

        let trade_credentials = match (
            optional_env("SCHWAB_TRADE_CLIENT_ID"),
            optional_env("SCHWAB_TRADE_CLIENT_SECRET"),
            optional_env("SCHWAB_TRADE_REFRESH_TOKEN"),
        ) {
            (Some(id), Some(secret), Some(refresh)) => {
                Some(OAuthCredentials::new(id, secret, refresh))
            }
            (None, None, None) => None,
            _ => return Err(ConfigError::IncompleteTradeCredentials),
        };

        let api_defaults = ApiSettings::default();
        let api = ApiSettings {
            oauth_base_url: optional_env("SCHWAB_OAUTH_BASE_URL")
                .unwrap_or(api_defaults.oauth_base_url),
            market_data_base_url: optional_env("SCHWAB_MARKET_DATA_BASE_URL")
                .unwrap_or(api_defaults.market_data_base_url),
            trader_base_url: optional_env("SCHWAB_TRADER_BASE_URL")
                .unwrap_or(api_defaults.trader_base_url),
            timeout: parse_env_duration_secs("SCHWAB_HTTP_TIMEOUT_SECS", api_defaults.timeout),
            refresh_max_attempts: parse_env_u32(
                "SCHWAB_REFRESH_MAX_ATTEMPTS",
                api_defaults.refresh_max_attempts,
            ),
            refresh_retry_delay: parse_env_duration_millis(
                "SCHWAB_REFRESH_RETRY_DELAY_MS",
                api_defaults.refresh_retry_delay,
            ),
        };

        let grid_defaults = GridSettings::default();
        let grid = GridSettings {
            underlying: optional_env("STREAM_UNDERLYING").unwrap_or(grid_defaults.underlying),
            option_root: optional_env("STREAM_OPTION_ROOT").unwrap_or(grid_defaults.option_root),
            strike_range: parse_env_f64("STREAM_STRIKE_RANGE", grid_defaults.strike_range),
            strike_step: parse_env_f64("STREAM_STRIKE_STEP", grid_defaults.strike_step),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            session_start: parse_env_time("STREAM_SESSION_START", stream_defaults.session_start),
            session_end: parse_env_time("STREAM_SESSION_END", stream_defaults.session_end),
            backoff: parse_env_duration_secs("STREAM_BACKOFF_SECS", stream_defaults.backoff),
            login_settle: parse_env_duration_millis(
                "STREAM_LOGIN_SETTLE_MS",
                stream_defaults.login_settle,
            ),
            no_data_threshold: parse_env_duration_secs(
                "STREAM_NO_DATA_THRESHOLD_SECS",
                stream_defaults.no_data_threshold,
            ),
            drift_threshold: parse_env_f64(
                "STREAM_DRIFT_THRESHOLD",
                stream_defaults.drift_threshold,
            ),
            watchdog_interval: parse_env_duration_secs(
                "STREAM_WATCHDOG_INTERVAL_SECS",
                stream_defaults.watchdog_interval,
            ),
            ping_interval: parse_env_duration_secs(
                "STREAM_PING_INTERVAL_SECS",
                stream_defaults.ping_interval,
            ),
            pong_timeout: parse_env_duration_secs(
                "STREAM_PONG_TIMEOUT_SECS",
                stream_defaults.pong_timeout,
            ),
        };

        let sink_defaults = SinkSettings::default();
        let sinks = SinkSettings {
            cache_backend: optional_env("CACHE_BACKEND")
                .map(|s| CacheBackend::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            redis_url: optional_env("REDIS_URL").unwrap_or(sink_defaults.redis_url),
            cache_namespace: optional_env("CACHE_NAMESPACE")
                .unwrap_or(sink_defaults.cache_namespace),
            cache_ttl: parse_env_duration_secs("CACHE_TTL_SECS", sink_defaults.cache_ttl),
            parquet_dir: optional_env("PARQUET_DIR").unwrap_or(sink_defaults.parquet_dir),
            batch_size: parse_env_usize("PARQUET_BATCH_SIZE", sink_defaults.batch_size),
        };

        let monitor_defaults = MonitorSettings::default();
        let monitor = MonitorSettings {
            enabled: optional_env("MONITOR_ENABLED").map_or(monitor_defaults.enabled, |v| {
                v.to_lowercase() != "false"
            }),
            cache_freshness: parse_env_duration_secs(
                "MONITOR_CACHE_FRESHNESS_SECS",
                monitor_defaults.cache_freshness,
            ),
            log_freshness: parse_env_duration_secs(
                "MONITOR_LOG_FRESHNESS_SECS",
                monitor_defaults.log_freshness,
            ),
            poll_interval: parse_env_duration_secs(
                "MONITOR_POLL_INTERVAL_SECS",
                monitor_defaults.poll_interval,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16("STREAM_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let config = Self {
            data_credentials,
            trade_credentials,
            api,
            grid,
            stream,
            sinks,
            monitor,
            alert_webhook_url: optional_env("ALERT_WEBHOOK_URL"),
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.strike_step.is_nan() || self.grid.strike_step <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "strike step must be positive, got {}",
                self.grid.strike_step
            )));
        }
        if self.grid.strike_range.is_nan() || self.grid.strike_range < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "strike range must not be negative, got {}",
                self.grid.strike_range
            )));
        }
        if self.sinks.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be at least 1".to_string()));
        }
        if self.stream.pong_timeout >= self.stream.ping_interval {
            return Err(ConfigError::Invalid(
                "pong timeout must be shorter than the ping interval".to_string(),
            ));
        }
        self.session_window()?;
        Ok(())
    }

    /// Daily run window.
    ///
    /// # Errors
    ///
    /// Returns an error unless start precedes end.
    pub fn session_window(&self) -> Result<SessionWindow, ConfigError> {
        SessionWindow::new(self.stream.session_start, self.stream.session_end)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Freshness criteria for the monitor.
    #[must_use]
    pub fn freshness_criteria(&self) -> FreshnessCriteria {
        FreshnessCriteria {
            underlying: self.grid.underlying.clone(),
            option_prefix: self.grid.option_root.clone(),
            cache_window: self.monitor.cache_freshness,
            log_window: self.monitor.log_freshness,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Only some trade credentials were set.
    #[error("trade credentials must be all set or all unset")]
    IncompleteTradeCredentials,
    /// Settings are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_time(key: &str, default: NaiveTime) -> NaiveTime {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_time(&v))
        .unwrap_or(default)
}

/// Parse `HH:MM` or `HH:MM:SS`.
fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamConfig {
        StreamConfig {
            data_credentials: OAuthCredentials::new(
                "id".to_string(),
                "secret".to_string(),
                "refresh".to_string(),
            ),
            trade_credentials: None,
            api: ApiSettings::default(),
            grid: GridSettings::default(),
            stream: StreamSettings::default(),
            sinks: SinkSettings::default(),
            monitor: MonitorSettings::default(),
            alert_webhook_url: None,
            server: ServerSettings::default(),
        }
    }

    #[test]
    fn cache_backend_parsing() {
        assert_eq!(CacheBackend::from_str_case_insensitive("memory"), CacheBackend::Memory);
        assert_eq!(CacheBackend::from_str_case_insensitive("MEMORY"), CacheBackend::Memory);
        assert_eq!(CacheBackend::from_str_case_insensitive("redis"), CacheBackend::Redis);
        assert_eq!(CacheBackend::from_str_case_insensitive("other"), CacheBackend::Redis);
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = OAuthCredentials::new(
            "key123".to_string(),
            "secret456".to_string(),
            "refresh789".to_string(),
        );
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(!debug.contains("refresh789"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn stream_settings_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.session_end, NaiveTime::from_hms_opt(13, 0, 0).unwrap());
        assert_eq!(settings.backoff, Duration::from_secs(10));
        assert_eq!(settings.no_data_threshold, Duration::from_secs(30));
        assert!((settings.drift_threshold - 30.0).abs() < f64::EPSILON);
        assert_eq!(settings.ping_interval, Duration::from_secs(30));
        assert_eq!(settings.pong_timeout, Duration::from_secs(10));
    }

    #[test]
    fn sink_settings_defaults() {
        let settings = SinkSettings::default();
        assert_eq!(settings.cache_namespace, "SPX:QUOTE");
        assert_eq!(settings.cache_ttl, Duration::from_secs(600));
        assert_eq!(settings.batch_size, 1000);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(config().validate().is_ok());
        let criteria = config().freshness_criteria();
        assert_eq!(criteria.underlying, "$SPX");
        assert_eq!(criteria.option_prefix, "SPXW");
    }

    #[test]
    fn rejects_bad_grid() {
        let mut cfg = config();
        cfg.grid.strike_step = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = config();
        cfg.grid.strike_range = -1.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_slow_pong_and_inverted_window() {
        let mut cfg = config();
        cfg.stream.pong_timeout = Duration::from_secs(30);
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.stream.session_start = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn time_parsing() {
        assert_eq!(parse_time("13:00"), NaiveTime::from_hms_opt(13, 0, 0));
        assert_eq!(parse_time("06:30:15"), NaiveTime::from_hms_opt(6, 30, 15));
        assert_eq!(parse_time("noon"), None);
    }
}
