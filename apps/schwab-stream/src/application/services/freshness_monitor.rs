//! Freshness Monitor
//!
//! Independent periodic check of both sinks. It shares nothing with the
//! stream client beyond the sinks themselves and only reads flushed
//! partitions, never the durable log's in-memory buffer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Notifier, PartitionReader, QuoteCache};
use crate::domain::freshness::{AlertGate, FreshnessCriteria, FreshnessReport, SinkFreshness};
use crate::domain::quote::QuoteRecord;
use crate::infrastructure::metrics;

/// Alert subject for two consecutive violations.
pub const ALERT_SUBJECT: &str = "ALERT: Data freshness issue detected";

/// Periodic two-sink freshness check.
pub struct FreshnessMonitor {
    cache: Arc<dyn QuoteCache>,
    partitions: Arc<dyn PartitionReader>,
    notifier: Arc<dyn Notifier>,
    criteria: FreshnessCriteria,
    interval: Duration,
}

impl FreshnessMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        cache: Arc<dyn QuoteCache>,
        partitions: Arc<dyn PartitionReader>,
        notifier: Arc<dyn Notifier>,
        criteria: FreshnessCriteria,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            partitions,
            notifier,
            criteria,
            interval,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut gate = AlertGate::new();

        tracing::info!(
            cache_window_secs = self.criteria.cache_window.as_secs(),
            log_window_secs = self.criteria.log_window.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Freshness monitor started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_once(&mut gate, Local::now()).await;
                }
            }
        }

        tracing::info!("Freshness monitor stopped");
    }

    /// One evaluation period. Returns the report and whether an alert fired.
    pub async fn check_once(&self, gate: &mut AlertGate, now: DateTime<Local>) -> (FreshnessReport, bool) {
        let report = self.evaluate(now).await;
        let violation = report.is_violation();

        tracing::info!(
            cache_underlying_fresh = report.cache.underlying_fresh,
            cache_fresh_options = report.cache.fresh_options,
            log_underlying_fresh = report.log.underlying_fresh,
            log_fresh_options = report.log.fresh_options,
            violation,
            "Freshness report"
        );

        if violation {
            metrics::record_freshness_violation();
        }

        let fire = gate.observe(violation);
        if fire {
            let body = format!(
                "{} - Freshness check failed two times in a row:\n{report}",
                now.format("%Y-%m-%d %H:%M:%S")
            );
            self.notifier.notify(ALERT_SUBJECT, &body).await;
            metrics::record_alert();
        }

        (report, fire)
    }

    /// Build the four-fact report for `now`.
    pub async fn evaluate(&self, now: DateTime<Local>) -> FreshnessReport {
        let now_ms = now.timestamp_millis();
        let criteria = &self.criteria;

        let mut cached: Vec<QuoteRecord> = Vec::new();
        match self.cache.latest(&criteria.underlying).await {
            Ok(Some(record)) => cached.push(record),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Cache underlying lookup failed"),
        }
        match self.cache.scan(&criteria.option_prefix).await {
            Ok(records) => cached.extend(records),
            Err(e) => tracing::warn!(error = %e, "Cache option scan failed"),
        }

        let logged = match self.partitions.read_partition(now.date_naive()).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Partition read failed");
                Vec::new()
            }
        };

        FreshnessReport {
            cache: SinkFreshness::from_records(
                &cached,
                &criteria.underlying,
                &criteria.option_prefix,
                criteria.cache_window,
                now_ms,
            ),
            log: SinkFreshness::from_records(
                &logged,
                &criteria.underlying,
                &criteria.option_prefix,
                criteria.log_window,
                now_ms,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        MockNotifier, MockPartitionReader, MockQuoteCache, SinkError,
    };
    use chrono::TimeZone;
    use serde_json::Map;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 12, 18, 10, 0, 0).unwrap()
    }

    fn rec(symbol: &str, age_secs: i64) -> QuoteRecord {
        QuoteRecord::new(now().timestamp_millis() - age_secs * 1000, symbol, Map::new())
    }

    fn cache_with(underlying_age: Option<i64>, option_age: Option<i64>) -> MockQuoteCache {
        let mut cache = MockQuoteCache::new();
        cache
            .expect_latest()
            .returning(move |s| Ok(underlying_age.map(|a| rec(s, a))));
        cache
            .expect_scan()
            .returning(move |_| Ok(option_age.map(|a| vec![rec("SPXW  241218C05000000", a)]).unwrap_or_default()));
        cache
    }

    fn reader_with(records: Vec<QuoteRecord>) -> MockPartitionReader {
        let mut reader = MockPartitionReader::new();
        reader
            .expect_read_partition()
            .returning(move |_| Ok(records.clone()));
        reader
    }

    fn monitor(cache: MockQuoteCache, reader: MockPartitionReader, notifier: MockNotifier) -> FreshnessMonitor {
        FreshnessMonitor::new(
            Arc::new(cache),
            Arc::new(reader),
            Arc::new(notifier),
            FreshnessCriteria::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn healthy_sinks_report_clean() {
        let m = monitor(
            cache_with(Some(5), Some(5)),
            reader_with(vec![rec("$SPX", 100), rec("SPXW  241218P05000000", 110)]),
            MockNotifier::new(),
        );
        let report = m.evaluate(now()).await;
        assert!(!report.is_violation());
        assert_eq!(report.log.fresh_options, 1);
    }

    #[tokio::test]
    async fn stale_cached_underlying_is_violation() {
        let m = monitor(
            cache_with(Some(61), Some(5)),
            reader_with(vec![rec("$SPX", 1), rec("SPXW  241218P05000000", 1)]),
            MockNotifier::new(),
        );
        let report = m.evaluate(now()).await;
        assert!(!report.cache.underlying_fresh);
        assert!(report.is_violation());
    }

    #[tokio::test]
    async fn sink_errors_count_as_missing() {
        let mut cache = MockQuoteCache::new();
        cache
            .expect_latest()
            .returning(|_| Err(SinkError::Cache("refused".to_string())));
        cache.expect_scan().returning(|_| Ok(vec![]));
        let mut reader = MockPartitionReader::new();
        reader
            .expect_read_partition()
            .returning(|_| Err(SinkError::Storage("corrupt".to_string())));

        let report = monitor(cache, reader, MockNotifier::new()).evaluate(now()).await;
        assert_eq!(report, FreshnessReport::default());
        assert!(report.is_violation());
    }

    #[tokio::test]
    async fn alerts_on_second_consecutive_violation_only() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|subject, body| subject.to_string() == ALERT_SUBJECT && body.contains("two times in a row"))
            .times(1)
            .return_const(());

        let m = monitor(cache_with(None, None), reader_with(vec![]), notifier);
        let mut gate = AlertGate::new();

        let (_, first) = m.check_once(&mut gate, now()).await;
        let (_, second) = m.check_once(&mut gate, now()).await;
        let (_, third) = m.check_once(&mut gate, now()).await;

        assert!(!first);
        assert!(second);
        assert!(!third);
    }
}
