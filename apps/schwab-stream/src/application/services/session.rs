//! Session Controller
//!
//! Owns the outer reconnect loop for one trading day. The window end is
//! computed once at startup; until it is reached the controller runs a fresh
//! connection to completion, and after a premature disconnect waits a fixed
//! backoff before retrying. The watchdog runs for the controller's whole
//! life, not per connection.
//!
//! On exit (window end or external cancellation) the watchdog is stopped and
//! the durable log is flushed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::tick_sink::TickSink;
use super::watchdog::Watchdog;
use crate::application::ports::ConnectionRunner;
use crate::domain::session::SessionWindow;
use crate::infrastructure::metrics;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Started outside the run window; nothing was attempted.
    OutsideWindow,
    /// The window end was reached.
    WindowClosed,
    /// Shut down externally.
    Cancelled,
}

/// Outcome of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Why the session ended.
    pub end: SessionEnd,
    /// Connection attempts made.
    pub attempts: u32,
    /// Attempts that ended in error.
    pub failures: u32,
}

/// Daily reconnect loop.
pub struct SessionController {
    window: SessionWindow,
    runner: Arc<dyn ConnectionRunner>,
    watchdog: Watchdog,
    sink: TickSink,
    backoff: Duration,
}

impl SessionController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        window: SessionWindow,
        runner: Arc<dyn ConnectionRunner>,
        watchdog: Watchdog,
        sink: TickSink,
        backoff: Duration,
    ) -> Self {
        Self {
            window,
            runner,
            watchdog,
            sink,
            backoff,
        }
    }

    /// Run today's session against the local wall clock.
    pub async fn run(&self, shutdown: CancellationToken) -> SessionSummary {
        let now = Local::now();
        let Some(deadline) = self.window.deadline(&now) else {
            tracing::info!(
                now = %now.format("%H:%M:%S"),
                start = %self.window.start(),
                end = %self.window.end(),
                "Outside session window, not connecting"
            );
            return SessionSummary {
                end: SessionEnd::OutsideWindow,
                attempts: 0,
                failures: 0,
            };
        };

        let remaining = (deadline - now).to_std().unwrap_or_default();
        tracing::info!(end = %deadline.format("%H:%M:%S"), "Session window open");
        self.run_until(Instant::now() + remaining, shutdown).await
    }

    /// Run the reconnect loop until `deadline` or cancellation.
    pub async fn run_until(&self, deadline: Instant, shutdown: CancellationToken) -> SessionSummary {
        let watchdog_cancel = shutdown.child_token();
        let watchdog = tokio::spawn(self.watchdog.clone().run(watchdog_cancel.clone()));

        let mut attempts = 0u32;
        let mut failures = 0u32;

        let end = loop {
            if shutdown.is_cancelled() {
                break SessionEnd::Cancelled;
            }
            if Instant::now() >= deadline {
                break SessionEnd::WindowClosed;
            }

            attempts += 1;
            metrics::record_connection_attempt();
            let stop = shutdown.child_token();
            let connection = self.runner.run_connection(stop.clone());
            tokio::pin!(connection);

            let result = tokio::select! {
                result = &mut connection => result,
                () = tokio::time::sleep_until(deadline) => {
                    tracing::info!("Session window closed, stopping connection");
                    stop.cancel();
                    connection.await
                }
            };
            stop.cancel();

            match result {
                Ok(()) => tracing::info!(attempt = attempts, "Connection ended"),
                Err(e) => {
                    failures += 1;
                    metrics::record_connection_failure(e.kind());
                    tracing::warn!(attempt = attempts, error = %e, "Connection ended with error");
                }
            }

            if shutdown.is_cancelled() {
                break SessionEnd::Cancelled;
            }
            if Instant::now() >= deadline {
                break SessionEnd::WindowClosed;
            }

            tracing::info!(backoff_secs = self.backoff.as_secs(), "Reconnecting after backoff");

            tokio::select! {
                () = shutdown.cancelled() => break SessionEnd::Cancelled,
                () = tokio::time::sleep_until(deadline) => break SessionEnd::WindowClosed,
                () = tokio::time::sleep(self.backoff) => {}
            }
        };

        watchdog_cancel.cancel();
        if let Err(e) = watchdog.await {
            tracing::error!(error = %e, "Watchdog task failed");
        }

        if let Err(e) = self.sink.flush().await {
            tracing::error!(error = %e, "Final durable flush failed");
        }

        tracing::info!(?end, attempts, failures, "Session finished");
        SessionSummary {
            end,
            attempts,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        ConnectionError, MockConnectionRunner, MockQuoteCache, MockQuoteLog,
    };
    use crate::application::services::stream_state::SharedStreamState;
    use crate::domain::liveness::LivenessThresholds;
    use chrono::NaiveTime;

    fn window() -> SessionWindow {
        SessionWindow::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        )
        .unwrap()
    }

    fn controller(runner: MockConnectionRunner, flushes: usize) -> SessionController {
        let mut log = MockQuoteLog::new();
        log.expect_flush().times(flushes).returning(|| Ok(()));
        let sink = TickSink::new(Arc::new(MockQuoteCache::new()), Arc::new(log));
        let watchdog = Watchdog::new(
            Arc::new(SharedStreamState::new()),
            LivenessThresholds::default(),
            Duration::from_secs(30),
        );
        SessionController::new(window(), Arc::new(runner), watchdog, sink, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_backoff_until_deadline() {
        let mut runner = MockConnectionRunner::new();
        runner
            .expect_run_connection()
            .returning(|_| Err(ConnectionError::Closed));

        let summary = controller(runner, 1)
            .run_until(Instant::now() + Duration::from_secs(35), CancellationToken::new())
            .await;

        assert_eq!(summary.end, SessionEnd::WindowClosed);
        // t=0, t=10, t=20, t=30
        assert_eq!(summary.attempts, 4);
        assert_eq!(summary.failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_makes_no_attempt() {
        let mut runner = MockConnectionRunner::new();
        runner.expect_run_connection().times(0);

        let summary = controller(runner, 1)
            .run_until(Instant::now(), CancellationToken::new())
            .await;
        assert_eq!(summary.end, SessionEnd::WindowClosed);
        assert_eq!(summary.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_end_before_deadline_still_backs_off() {
        let mut runner = MockConnectionRunner::new();
        runner.expect_run_connection().times(2).returning(|_| Ok(()));

        let summary = controller(runner, 1)
            .run_until(Instant::now() + Duration::from_secs(15), CancellationToken::new())
            .await;
        assert_eq!(summary.end, SessionEnd::WindowClosed);
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_session_and_flushes() {
        let mut runner = MockConnectionRunner::new();
        runner.expect_run_connection().returning(|_| Ok(()));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = controller(runner, 1)
            .run_until(Instant::now() + Duration::from_secs(3600), shutdown)
            .await;
        assert_eq!(summary.end, SessionEnd::Cancelled);
        assert_eq!(summary.attempts, 0);
    }
}
