//! Connection Liveness
//!
//! Connection lifecycle state plus the liveness facts the watchdog consults:
//! when the last accepted tick arrived and how far the underlying has moved
//! since the subscription grid was computed.
//!
//! The assessment here is pure; locking and the forced close live in the
//! application layer.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of one physical connection.
///
/// `Idle` is both the initial and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Logged in and subscribed.
    Open,
    /// A close has been requested.
    Closing,
}

impl ConnectionState {
    /// Lowercase label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }

    /// Numeric gauge value.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
        }
    }
}

// =============================================================================
// Liveness State
// =============================================================================

/// Liveness facts for the current connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessState {
    /// Arrival time of the last accepted tick (or connection start).
    pub last_message_time: Instant,
    /// Underlying price the subscription grid was built from.
    pub initial_reference_price: Option<f64>,
    /// Most recent underlying price.
    pub current_reference_price: Option<f64>,
}

impl LivenessState {
    /// Fresh state anchored at `now`.
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            last_message_time: now,
            initial_reference_price: None,
            current_reference_price: None,
        }
    }

    /// Time since the last accepted tick.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_message_time)
    }

    /// Absolute move of the underlying since the grid was built.
    #[must_use]
    pub fn drift(&self) -> Option<f64> {
        match (self.initial_reference_price, self.current_reference_price) {
            (Some(initial), Some(current)) => Some((current - initial).abs()),
            _ => None,
        }
    }
}

// =============================================================================
// Thresholds & Assessment
// =============================================================================

/// Limits beyond which the watchdog forces a reconnect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessThresholds {
    /// Maximum silence before reconnecting.
    pub no_data: Duration,
    /// Maximum underlying move before the grid is rebuilt.
    pub drift: f64,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            no_data: Duration::from_secs(30),
            drift: 30.0,
        }
    }
}

/// Why the watchdog forced a reconnect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectReason {
    /// No accepted tick within the no-data threshold.
    Silence {
        /// Observed silence.
        age: Duration,
    },
    /// Underlying moved too far from the grid centre.
    Drift {
        /// Price the grid was built from.
        initial: f64,
        /// Latest price.
        current: f64,
    },
}

impl ReconnectReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Silence { .. } => "silence",
            Self::Drift { .. } => "drift",
        }
    }
}

impl std::fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silence { age } => write!(f, "no data for {:.1}s", age.as_secs_f64()),
            Self::Drift { initial, current } => {
                write!(f, "underlying drifted from {initial} to {current}")
            }
        }
    }
}

/// Decide whether the current liveness state warrants a reconnect.
///
/// Silence triggers strictly above the threshold; drift triggers at or above
/// it. Silence is reported first when both apply.
#[must_use]
pub fn assess(
    state: &LivenessState,
    thresholds: &LivenessThresholds,
    now: Instant,
) -> Option<ReconnectReason> {
    let age = state.silence(now);
    if age > thresholds.no_data {
        return Some(ReconnectReason::Silence { age });
    }

    if let (Some(initial), Some(current)) =
        (state.initial_reference_price, state.current_reference_price)
        && (current - initial).abs() >= thresholds.drift
    {
        return Some(ReconnectReason::Drift { initial, current });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn state_at(now: Instant, age: Duration, initial: Option<f64>, current: Option<f64>) -> LivenessState {
        LivenessState {
            last_message_time: now.checked_sub(age).unwrap(),
            initial_reference_price: initial,
            current_reference_price: current,
        }
    }

    #[test]
    fn silence_beyond_threshold_triggers() {
        let now = Instant::now();
        let state = state_at(now, Duration::from_secs(45), Some(5000.0), Some(5000.0));
        let reason = assess(&state, &LivenessThresholds::default(), now);
        assert!(matches!(reason, Some(ReconnectReason::Silence { age }) if age == Duration::from_secs(45)));
    }

    #[test]
    fn silence_at_threshold_does_not_trigger() {
        let now = Instant::now();
        let state = state_at(now, Duration::from_secs(30), None, None);
        assert_eq!(assess(&state, &LivenessThresholds::default(), now), None);
    }

    #[test_case(5029.0 => false ; "below threshold")]
    #[test_case(5030.0 => true ; "at threshold")]
    #[test_case(4970.0 => true ; "downward at threshold")]
    #[test_case(4975.5 => false ; "downward below threshold")]
    fn drift_threshold(current: f64) -> bool {
        let now = Instant::now();
        let state = state_at(now, Duration::from_secs(1), Some(5000.0), Some(current));
        matches!(
            assess(&state, &LivenessThresholds::default(), now),
            Some(ReconnectReason::Drift { .. })
        )
    }

    #[test]
    fn drift_needs_both_prices() {
        let now = Instant::now();
        let state = state_at(now, Duration::ZERO, None, Some(9000.0));
        assert_eq!(assess(&state, &LivenessThresholds::default(), now), None);
        assert_eq!(state.drift(), None);
    }

    #[test]
    fn connection_state_labels() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ConnectionState::Open.as_str(), "open");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"connecting\""
        );
    }

    #[test]
    fn reason_display() {
        let reason = ReconnectReason::Drift {
            initial: 5000.0,
            current: 5030.0,
        };
        assert_eq!(reason.to_string(), "underlying drifted from 5000 to 5030");
        assert_eq!(reason.as_str(), "drift");
    }
}
