//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Frames received by service, ticks accepted and dropped
//! - **Connections**: Attempts, failures, forced reconnects, current state
//! - **Sinks**: Write failures and durable flush latency
//! - **Freshness**: Violations and alerts fired
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::liveness::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "schwab_stream_messages_received_total",
        "Data blocks received from the push feed by service"
    );
    describe_counter!(
        "schwab_stream_ticks_accepted_total",
        "Quote records accepted and written to the sinks"
    );
    describe_counter!(
        "schwab_stream_ticks_dropped_total",
        "Quote items dropped as partial or malformed"
    );

    // Connection metrics
    describe_counter!(
        "schwab_stream_connection_attempts_total",
        "Streaming connection attempts"
    );
    describe_counter!(
        "schwab_stream_connection_failures_total",
        "Streaming connection attempts that ended in error"
    );
    describe_counter!(
        "schwab_stream_forced_reconnects_total",
        "Reconnects forced by the watchdog"
    );
    describe_gauge!(
        "schwab_stream_connection_state",
        "Connection state (0 idle, 1 connecting, 2 open, 3 closing)"
    );

    // Sink metrics
    describe_counter!(
        "schwab_stream_sink_failures_total",
        "Failed writes to the cache or durable log"
    );
    describe_counter!(
        "schwab_stream_records_discarded_total",
        "Records discarded by a sink (log backlog overflow, undecodable cache values)"
    );
    describe_histogram!(
        "schwab_stream_flush_duration_seconds",
        "Time to rewrite a durable partition"
    );

    // Freshness metrics
    describe_counter!(
        "schwab_stream_freshness_violations_total",
        "Monitor periods that violated a freshness check"
    );
    describe_counter!(
        "schwab_stream_alerts_total",
        "Alerts sent through the notifier"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Tick kind label.
#[derive(Debug, Clone, Copy)]
pub enum TickKind {
    /// Option quote.
    Option,
    /// Underlying quote.
    Underlying,
}

impl TickKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Option => "option",
            Self::Underlying => "underlying",
        }
    }
}

/// Sink label.
#[derive(Debug, Clone, Copy)]
pub enum SinkKind {
    /// Ephemeral cache.
    Cache,
    /// Durable log.
    Log,
}

impl SinkKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Log => "log",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a data block received for a service.
pub fn record_message_received(service: &str) {
    counter!(
        "schwab_stream_messages_received_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record an accepted tick.
pub fn record_tick_accepted(kind: TickKind) {
    counter!(
        "schwab_stream_ticks_accepted_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a dropped tick item.
pub fn record_tick_dropped(kind: TickKind, reason: &'static str) {
    counter!(
        "schwab_stream_ticks_dropped_total",
        "kind" => kind.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a connection attempt.
pub fn record_connection_attempt() {
    counter!("schwab_stream_connection_attempts_total").increment(1);
}

/// Record a failed connection attempt.
pub fn record_connection_failure(reason: &'static str) {
    counter!(
        "schwab_stream_connection_failures_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a watchdog-forced reconnect.
pub fn record_forced_reconnect(reason: &'static str) {
    counter!(
        "schwab_stream_forced_reconnects_total",
        "reason" => reason
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("schwab_stream_connection_state").set(state.as_gauge());
}

/// Record a sink write failure.
pub fn record_sink_failure(sink: SinkKind) {
    counter!(
        "schwab_stream_sink_failures_total",
        "sink" => sink.as_str()
    )
    .increment(1);
}

/// Record records discarded by a sink.
pub fn record_records_discarded(sink: SinkKind, count: usize) {
    counter!(
        "schwab_stream_records_discarded_total",
        "sink" => sink.as_str()
    )
    .increment(count as u64);
}

/// Record durable flush duration.
pub fn record_flush_duration(duration: Duration) {
    histogram!("schwab_stream_flush_duration_seconds").record(duration.as_secs_f64());
}

/// Record a freshness violation.
pub fn record_freshness_violation() {
    counter!("schwab_stream_freshness_violations_total").increment(1);
}

/// Record an alert sent.
pub fn record_alert() {
    counter!("schwab_stream_alerts_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_kind_as_str() {
        assert_eq!(TickKind::Option.as_str(), "option");
        assert_eq!(TickKind::Underlying.as_str(), "underlying");
    }

    #[test]
    fn sink_kind_as_str() {
        assert_eq!(SinkKind::Cache.as_str(), "cache");
        assert_eq!(SinkKind::Log.as_str(), "log");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_accepted(TickKind::Option);
        record_sink_failure(SinkKind::Log);
        set_connection_state(ConnectionState::Open);
        record_flush_duration(Duration::from_millis(3));
        record_records_discarded(SinkKind::Cache, 2);
    }
}
