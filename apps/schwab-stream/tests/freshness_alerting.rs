//! Freshness Monitor Integration Tests
//!
//! Runs the monitor over the real in-memory cache and Parquet partitions in
//! a temporary directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use parking_lot::Mutex;
use serde_json::{Map, json};

use schwab_stream::application::services::freshness_monitor::ALERT_SUBJECT;
use schwab_stream::infrastructure::cache::MemoryQuoteCache;
use schwab_stream::infrastructure::storage::{ParquetPartitionReader, ParquetQuoteLog};
use schwab_stream::{
    AlertGate, FreshnessCriteria, FreshnessMonitor, Notifier, QuoteLog, QuoteRecord, TickSink,
};

#[derive(Default)]
struct RecordingNotifier {
    subjects: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, _body: &str) {
        self.subjects.lock().push(subject.to_string());
    }
}

struct Fixture {
    monitor: FreshnessMonitor,
    sink: TickSink,
    log: Arc<ParquetQuoteLog>,
    notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MemoryQuoteCache::new("SPX:QUOTE", Duration::from_secs(600)));
    let log = Arc::new(ParquetQuoteLog::new(dir.path(), 1000));
    let notifier = Arc::new(RecordingNotifier::default());

    let sink = TickSink::new(cache.clone(), log.clone());
    let monitor = FreshnessMonitor::new(
        cache,
        Arc::new(ParquetPartitionReader::new(dir.path())),
        notifier.clone(),
        FreshnessCriteria::default(),
        Duration::from_secs(30),
    );

    Fixture {
        monitor,
        sink,
        log,
        notifier,
        _dir: dir,
    }
}

fn record(symbol: &str, field: &str) -> QuoteRecord {
    let mut fields = Map::new();
    fields.insert(field.to_string(), json!(1.0));
    QuoteRecord::new(Local::now().timestamp_millis(), symbol, fields)
}

async fn feed(sink: &TickSink) {
    sink.accept(record("$SPX", "3")).await;
    sink.accept(record("SPXW  261016C05000000", "37")).await;
    sink.accept(record("SPXW  261016P05000000", "37")).await;
}

#[tokio::test]
async fn empty_sinks_alert_on_second_period() {
    let f = fixture();
    let mut gate = AlertGate::new();

    let (report, fired) = f.monitor.check_once(&mut gate, Local::now()).await;
    assert!(report.is_violation());
    assert!(!fired);

    let (_, fired) = f.monitor.check_once(&mut gate, Local::now()).await;
    assert!(fired);
    assert_eq!(f.notifier.subjects.lock().as_slice(), [ALERT_SUBJECT.to_string()]);
}

#[tokio::test]
async fn flushed_ticks_are_fresh_in_both_sinks() {
    let f = fixture();
    feed(&f.sink).await;
    f.log.flush().await.unwrap();

    let report = f.monitor.evaluate(Local::now()).await;
    assert!(!report.is_violation());
    assert!(report.cache.underlying_fresh);
    assert_eq!(report.cache.fresh_options, 2);
    assert!(report.log.underlying_fresh);
    assert_eq!(report.log.fresh_options, 2);
}

#[tokio::test]
async fn buffered_ticks_are_invisible_to_the_log_check() {
    let f = fixture();
    feed(&f.sink).await;
    assert_eq!(f.log.buffered().await, 3);

    let report = f.monitor.evaluate(Local::now()).await;
    assert!(!report.cache.is_violation());
    assert!(report.log.is_violation());
    assert_eq!(report.log.fresh_options, 0);
}

#[tokio::test]
async fn recovery_disarms_the_gate() {
    let f = fixture();
    let mut gate = AlertGate::new();

    let (_, fired) = f.monitor.check_once(&mut gate, Local::now()).await;
    assert!(!fired);
    assert!(gate.is_pending());

    feed(&f.sink).await;
    f.log.flush().await.unwrap();
    let (report, fired) = f.monitor.check_once(&mut gate, Local::now()).await;
    assert!(!report.is_violation());
    assert!(!fired);
    assert!(!gate.is_pending());
    assert!(f.notifier.subjects.lock().is_empty());
}
