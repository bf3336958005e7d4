//! Shared Stream State
//!
//! Connection state and liveness state behind one mutex. The stream client
//! is the only writer of liveness facts; the watchdog reads them and may
//! claim a forced close. Every transition goes through this lock so the
//! watchdog never acts mid-handshake or on a stale close handle.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::liveness::{
    ConnectionState, LivenessState, LivenessThresholds, ReconnectReason, assess,
};
use crate::infrastructure::metrics;

#[derive(Debug)]
struct Inner {
    connection: ConnectionState,
    liveness: LivenessState,
    close_handle: Option<CancellationToken>,
    connection_id: Option<String>,
    forced_reconnects: u64,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    /// Current connection state.
    pub connection: ConnectionState,
    /// Id of the current or last connection.
    pub connection_id: Option<String>,
    /// Seconds since the last accepted tick.
    pub silence_secs: f64,
    /// Grid reference price.
    pub initial_reference_price: Option<f64>,
    /// Latest underlying price.
    pub current_reference_price: Option<f64>,
    /// Watchdog-forced reconnects since start.
    pub forced_reconnects: u64,
}

/// Mutex-guarded connection and liveness state.
#[derive(Debug)]
pub struct SharedStreamState {
    inner: Mutex<Inner>,
}

impl Default for SharedStreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStreamState {
    /// Idle state with no connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                connection: ConnectionState::Idle,
                liveness: LivenessState::new(Instant::now()),
                close_handle: None,
                connection_id: None,
                forced_reconnects: 0,
            }),
        }
    }

    /// Start a connection attempt: reset liveness, enter `Connecting`, and
    /// register the handle the watchdog may cancel.
    pub fn begin_connect(&self, connection_id: &str, close: CancellationToken) {
        let mut inner = self.inner.lock();
        inner.connection = ConnectionState::Connecting;
        inner.liveness = LivenessState::new(Instant::now());
        inner.close_handle = Some(close);
        inner.connection_id = Some(connection_id.to_string());
        metrics::set_connection_state(ConnectionState::Connecting);
    }

    /// Record the grid reference price as both initial and current.
    pub fn set_reference_price(&self, price: f64) {
        let mut inner = self.inner.lock();
        inner.liveness.initial_reference_price = Some(price);
        inner.liveness.current_reference_price = Some(price);
        inner.liveness.last_message_time = Instant::now();
    }

    /// Enter `Open` if still connecting. Returns whether the transition
    /// happened.
    pub fn mark_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.connection != ConnectionState::Connecting {
            return false;
        }
        inner.connection = ConnectionState::Open;
        inner.liveness.last_message_time = Instant::now();
        metrics::set_connection_state(ConnectionState::Open);
        true
    }

    /// An option tick was accepted.
    pub fn record_message(&self) {
        self.inner.lock().liveness.last_message_time = Instant::now();
    }

    /// A valid underlying price was accepted.
    pub fn record_underlying(&self, price: f64) {
        let mut inner = self.inner.lock();
        inner.liveness.current_reference_price = Some(price);
        inner.liveness.last_message_time = Instant::now();
    }

    /// The socket closed for any reason. Drops the close handle so the
    /// watchdog stops acting on it.
    pub fn mark_closed(&self) {
        let mut inner = self.inner.lock();
        inner.connection = ConnectionState::Idle;
        inner.close_handle = None;
        metrics::set_connection_state(ConnectionState::Idle);
    }

    /// Current connection state.
    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// Copy of the liveness facts.
    #[must_use]
    pub fn liveness(&self) -> LivenessState {
        self.inner.lock().liveness
    }

    /// Watchdog check under the lock.
    ///
    /// Does nothing unless a connection is `Open` with a live handle. When a
    /// threshold is breached the state moves to `Closing` and the handle is
    /// taken before it is returned, so the caller's cancel cannot race the
    /// stream client's close handler.
    #[must_use]
    pub fn claim_forced_close(
        &self,
        thresholds: &LivenessThresholds,
        now: Instant,
    ) -> Option<(ReconnectReason, CancellationToken)> {
        let mut inner = self.inner.lock();
        if inner.connection != ConnectionState::Open || inner.close_handle.is_none() {
            return None;
        }

        let reason = assess(&inner.liveness, thresholds, now)?;
        inner.connection = ConnectionState::Closing;
        inner.forced_reconnects += 1;
        metrics::set_connection_state(ConnectionState::Closing);
        let handle = inner.close_handle.take()?;
        Some((reason, handle))
    }

    /// Health view.
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        let inner = self.inner.lock();
        StreamSnapshot {
            connection: inner.connection,
            connection_id: inner.connection_id.clone(),
            silence_secs: inner.liveness.silence(Instant::now()).as_secs_f64(),
            initial_reference_price: inner.liveness.initial_reference_price,
            current_reference_price: inner.liveness.current_reference_price,
            forced_reconnects: inner.forced_reconnects,
        }
    }

    /// Time since the last accepted tick.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.inner.lock().liveness.silence(Instant::now())
    }
}
