//! Keep-Alive Probe
//!
//! Sends a WebSocket ping on a fixed interval and waits a bounded time for
//! the pong. A missed pong ends the connection through the same path as any
//! other disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Probe timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Bounded wait for the pong.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_timeout: settings.pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame now.
    SendPing,
    /// The last ping went unanswered.
    Timeout,
}

/// Pong bookkeeping shared with the read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_pong: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_pong: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Instant::now();
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping is in flight.
    pub fn mark_ping_sent(&self) {
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is unanswered.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last pong.
    #[must_use]
    pub fn time_since_pong(&self) -> Duration {
        self.last_pong.read().elapsed()
    }
}

/// Periodic ping driver with a pong deadline.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes, or a pong is missed.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline;
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                () = sleep_until_opt(deadline) => {
                    if self.state.is_waiting_for_pong() {
                        tracing::warn!(
                            elapsed_ms = u64::try_from(self.state.time_since_pong().as_millis()).unwrap_or(u64::MAX),
                            timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                            "Keep-alive timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                        break;
                    }
                    pong_deadline = None;
                }
                _ = interval.tick() => {
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
