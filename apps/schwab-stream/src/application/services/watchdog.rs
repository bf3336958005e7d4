//! Liveness Watchdog
//!
//! Periodic supervisor that runs for the life of the session controller,
//! independent of message arrival. Each tick it asks the shared state for a
//! forced close; when one is claimed it cancels the connection's close
//! handle, which interrupts the stream client's blocked receive.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::stream_state::SharedStreamState;
use crate::domain::liveness::{LivenessThresholds, ReconnectReason};
use crate::infrastructure::metrics;

/// Watchdog over the shared stream state.
#[derive(Debug, Clone)]
pub struct Watchdog {
    state: Arc<SharedStreamState>,
    thresholds: LivenessThresholds,
    interval: Duration,
}

impl Watchdog {
    /// Create a watchdog.
    #[must_use]
    pub const fn new(
        state: Arc<SharedStreamState>,
        thresholds: LivenessThresholds,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            thresholds,
            interval,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(interval_secs = self.interval.as_secs(), "Watchdog started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Watchdog stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.check(Instant::now());
                }
            }
        }
    }

    /// One supervision pass. Returns the reason if a reconnect was forced.
    pub fn check(&self, now: Instant) -> Option<ReconnectReason> {
        let (reason, handle) = self.state.claim_forced_close(&self.thresholds, now)?;

        tracing::warn!(reason = %reason, "Forcing reconnect");
        metrics::record_forced_reconnect(reason.as_str());
        handle.cancel();
        Some(reason)
    }
}
