//! Parquet Quote Log
//!
//! Durable, day-partitioned append log. Records are buffered in memory and
//! written when the buffer reaches the batch size, when a record arrives for
//! a later calendar day than the buffered ones, or on an explicit flush.
//!
//! # Partition Layout
//!
//! `<dir>/quotes_<YYYY-MM-DD>.parquet`, keyed by the local calendar date of
//! `received_at`. Columns:
//!
//! | column        | type  | content                      |
//! |---------------|-------|------------------------------|
//! | `received_at` | Int64 | epoch milliseconds           |
//! | `symbol`      | Utf8  | instrument symbol            |
//! | `fields`      | Utf8  | remaining fields, JSON object |
//!
//! A flush reads the existing partition, appends the new rows, writes a
//! temporary sibling file, and renames it over the partition. Readers see
//! either the old partition or the new one, never a partial write.
//!
//! # Failure Policy
//!
//! A failed flush leaves the affected records buffered for the next attempt
//! and reports the error; ingestion continues. Until a flush succeeds, the
//! batch flush is retried once every `batch_size` appends, and the backlog is
//! capped by discarding the oldest records first. Explicit flushes and date
//! rollovers always attempt a write.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tokio::sync::Mutex;

use crate::application::ports::{PartitionReader, QuoteLog, SinkError};
use crate::domain::quote::{QuoteFields, QuoteRecord};
use crate::infrastructure::metrics::{self, SinkKind};

// =============================================================================
// Errors
// =============================================================================

/// Partition read or write failure.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet encoding failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow batch failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Fields column is not a JSON object.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Partition does not have the expected columns.
    #[error("invalid partition schema: {0}")]
    Schema(String),

    /// Blocking task failed.
    #[error("flush task failed: {0}")]
    Task(String),
}

impl From<PartitionError> for SinkError {
    fn from(e: PartitionError) -> Self {
        match e {
            PartitionError::Json(e) => Self::Serialization(e.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

// =============================================================================
// Partition Files
// =============================================================================

/// Local calendar date a record is partitioned under.
#[must_use]
pub fn partition_date(received_at_ms: i64) -> NaiveDate {
    DateTime::from_timestamp_millis(received_at_ms).map_or_else(
        || Local::now().date_naive(),
        |utc| utc.with_timezone(&Local).date_naive(),
    )
}

/// Path of one day's partition.
#[must_use]
pub fn partition_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("quotes_{}.parquet", date.format("%Y-%m-%d")))
}

fn partition_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("received_at", DataType::Int64, false),
        Field::new("symbol", DataType::Utf8, false),
        Field::new("fields", DataType::Utf8, false),
    ]))
}

fn to_batch<'a, I>(records: I) -> Result<RecordBatch, PartitionError>
where
    I: IntoIterator<Item = &'a QuoteRecord>,
{
    let mut received_at = Vec::new();
    let mut symbols = Vec::new();
    let mut fields = Vec::new();
    for record in records {
        received_at.push(record.received_at());
        symbols.push(record.symbol().to_string());
        fields.push(serde_json::to_string(record.fields())?);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(received_at)),
        Arc::new(StringArray::from(symbols)),
        Arc::new(StringArray::from(fields)),
    ];
    Ok(RecordBatch::try_new(partition_schema(), columns)?)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, PartitionError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| PartitionError::Schema(format!("missing Utf8 column {name}")))
}

/// Read every record in a partition file. A missing file is empty.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be decoded.
pub fn read_partition_file(path: &Path) -> Result<Vec<QuoteRecord>, PartitionError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let received_at = batch
            .column_by_name("received_at")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| PartitionError::Schema("missing Int64 column received_at".to_string()))?;
        let symbols = string_column(&batch, "symbol")?;
        let fields = string_column(&batch, "fields")?;

        for row in 0..batch.num_rows() {
            let map: QuoteFields = serde_json::from_str(fields.value(row))?;
            records.push(QuoteRecord::new(
                received_at.value(row),
                symbols.value(row),
                map,
            ));
        }
    }
    Ok(records)
}

/// Append records to a partition through a temporary sibling and rename.
fn append_partition(path: &Path, records: &[&QuoteRecord]) -> Result<(), PartitionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let existing = read_partition_file(path)?;
    let batch = to_batch(existing.iter().chain(records.iter().copied()))?;

    let tmp_path = path.with_extension("parquet.tmp");
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(&tmp_path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Write buffered records grouped by day. Returns the records that could not
/// be written, with the first error.
fn flush_records(
    dir: &Path,
    records: Vec<QuoteRecord>,
) -> (Vec<QuoteRecord>, Result<usize, PartitionError>) {
    let mut by_date: BTreeMap<NaiveDate, Vec<&QuoteRecord>> = BTreeMap::new();
    for record in &records {
        by_date
            .entry(partition_date(record.received_at()))
            .or_default()
            .push(record);
    }

    let mut written = HashSet::new();
    let mut rows = 0;
    let mut outcome = Ok(());
    for (date, group) in &by_date {
        let path = partition_path(dir, *date);
        match append_partition(&path, group) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), rows = group.len(), "Flushed partition");
                rows += group.len();
                written.insert(*date);
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    drop(by_date);

    let remaining: Vec<QuoteRecord> = records
        .into_iter()
        .filter(|r| !written.contains(&partition_date(r.received_at())))
        .collect();
    (remaining, outcome.map(|()| rows))
}

// =============================================================================
// Quote Log
// =============================================================================

/// Backlog kept across failed flushes, in batches.
const DEFAULT_BACKLOG_BATCHES: usize = 10;

#[derive(Debug, Default)]
struct Buffer {
    records: Vec<QuoteRecord>,
    date: Option<NaiveDate>,
    /// Appends left before a failed batch flush is retried.
    retry_in: usize,
}

/// Buffered Parquet writer.
#[derive(Debug)]
pub struct ParquetQuoteLog {
    dir: PathBuf,
    batch_size: usize,
    max_buffered: usize,
    buffer: Mutex<Buffer>,
}

impl ParquetQuoteLog {
    /// Create a log writing partitions under `dir`.
    ///
    /// While flushes fail, at most ten batches are kept buffered.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            dir: dir.into(),
            batch_size,
            max_buffered: batch_size.saturating_mul(DEFAULT_BACKLOG_BATCHES),
            buffer: Mutex::new(Buffer::default()),
        }
    }

    /// Cap the records kept while flushes fail. Never below one batch.
    #[must_use]
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered.max(self.batch_size);
        self
    }

    /// Records waiting for the next flush.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.records.len()
    }

    async fn flush_buffer(&self, buffer: &mut Buffer) -> Result<(), SinkError> {
        if buffer.records.is_empty() {
            buffer.retry_in = 0;
            return Ok(());
        }

        let started = Instant::now();
        let dir = self.dir.clone();
        let records = std::mem::take(&mut buffer.records);
        let count = records.len();
        let (remaining, outcome) =
            tokio::task::spawn_blocking(move || flush_records(&dir, records))
                .await
                .map_err(|e| SinkError::from(PartitionError::Task(e.to_string())))?;

        buffer.records = remaining;
        buffer.date = buffer
            .records
            .iter()
            .map(|r| partition_date(r.received_at()))
            .max();

        match outcome {
            Ok(rows) => {
                buffer.retry_in = 0;
                metrics::record_flush_duration(started.elapsed());
                tracing::debug!(rows, elapsed_ms = started.elapsed().as_millis(), "Durable log flushed");
                Ok(())
            }
            Err(e) => {
                buffer.retry_in = self.batch_size;
                tracing::warn!(
                    error = %e,
                    buffered = buffer.records.len(),
                    attempted = count,
                    "Durable log flush failed, keeping records buffered"
                );
                Err(e.into())
            }
        }
    }

    /// Drop the oldest records beyond the backlog cap.
    fn discard_overflow(&self, buffer: &mut Buffer) {
        let excess = buffer.records.len().saturating_sub(self.max_buffered);
        if excess == 0 {
            return;
        }
        buffer.records.drain(..excess);
        metrics::record_records_discarded(SinkKind::Log, excess);
        tracing::warn!(
            discarded = excess,
            retained = buffer.records.len(),
            "Durable log backlog full, discarding oldest records"
        );
    }
}

#[async_trait]
impl QuoteLog for ParquetQuoteLog {
    async fn append(&self, record: QuoteRecord) -> Result<(), SinkError> {
        let date = partition_date(record.received_at());
        let mut buffer = self.buffer.lock().await;

        let rollover = if buffer.date.is_some_and(|current| date > current) {
            tracing::info!(%date, "Calendar date advanced, flushing previous day");
            self.flush_buffer(&mut buffer).await
        } else {
            Ok(())
        };

        // Buffered even when the previous day failed to flush.
        buffer.records.push(record);
        buffer.date = Some(buffer.date.map_or(date, |current| current.max(date)));
        self.discard_overflow(&mut buffer);
        rollover?;

        // After a failure, retry once per batch of new appends.
        if buffer.retry_in > 0 {
            buffer.retry_in -= 1;
            if buffer.retry_in > 0 {
                return Ok(());
            }
        }
        if buffer.records.len() >= self.batch_size {
            self.flush_buffer(&mut buffer).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut buffer = self.buffer.lock().await;
        self.flush_buffer(&mut buffer).await
    }
}

// =============================================================================
// Partition Reader
// =============================================================================

/// Read-back of flushed partitions.
#[derive(Debug, Clone)]
pub struct ParquetPartitionReader {
    dir: PathBuf,
}

impl ParquetPartitionReader {
    /// Create a reader over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PartitionReader for ParquetPartitionReader {
    async fn read_partition(&self, date: NaiveDate) -> Result<Vec<QuoteRecord>, SinkError> {
        let path = partition_path(&self.dir, date);
        tokio::task::spawn_blocking(move || read_partition_file(&path))
            .await
            .map_err(|e| SinkError::from(PartitionError::Task(e.to_string())))?
            .map_err(SinkError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    fn millis_on(date: NaiveDate, hour: u32) -> i64 {
        Local
            .from_local_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
            .earliest()
            .unwrap()
            .timestamp_millis()
    }

    fn option_record(at: i64, symbol: &str, last: f64) -> QuoteRecord {
        let mut fields = QuoteFields::new();
        fields.insert("37".to_string(), json!(last));
        fields.insert("38".to_string(), json!(11.25));
        QuoteRecord::new(at, symbol, fields)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 18).unwrap()
    }

    #[test]
    fn partition_naming() {
        assert_eq!(
            partition_path(Path::new("/data"), day()),
            PathBuf::from("/data/quotes_2024-12-18.parquet")
        );
    }

    #[tokio::test]
    async fn written_records_read_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let log = ParquetQuoteLog::new(dir.path(), 100);
        let at = millis_on(day(), 10);

        let mut mixed = QuoteFields::new();
        mixed.insert("3".to_string(), json!(5012.123_456_789));
        mixed.insert("35".to_string(), json!(1_734_530_400_000_i64));
        mixed.insert("note".to_string(), json!("x"));
        let records = vec![
            option_record(at, "SPXW  241218C05000000", 12.5),
            QuoteRecord::new(at + 1, "$SPX", mixed),
        ];
        for r in records.clone() {
            log.append(r).await.unwrap();
        }
        log.flush().await.unwrap();

        let reader = ParquetPartitionReader::new(dir.path());
        let read = reader.read_partition(day()).await.unwrap();
        assert_eq!(read, records);
    }

    #[tokio::test]
    async fn flushes_when_batch_fills() {
        let dir = tempfile::tempdir().unwrap();
        let log = ParquetQuoteLog::new(dir.path(), 2);
        let at = millis_on(day(), 10);

        log.append(option_record(at, "A", 1.0)).await.unwrap();
        assert_eq!(log.buffered().await, 1);
        assert!(!partition_path(dir.path(), day()).exists());

        log.append(option_record(at, "B", 2.0)).await.unwrap();
        assert_eq!(log.buffered().await, 0);
        assert!(partition_path(dir.path(), day()).exists());
    }

    #[tokio::test]
    async fn successive_flushes_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = ParquetQuoteLog::new(dir.path(), 1);
        let at = millis_on(day(), 10);

        log.append(option_record(at, "A", 1.0)).await.unwrap();
        log.append(option_record(at + 5, "B", 2.0)).await.unwrap();

        let read = read_partition_file(&partition_path(dir.path(), day())).unwrap();
        let symbols: Vec<&str> = read.iter().map(QuoteRecord::symbol).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn date_rollover_flushes_previous_day() {
        let dir = tempfile::tempdir().unwrap();
        let log = ParquetQuoteLog::new(dir.path(), 1000);
        let next_day = day() + ChronoDuration::days(1);

        log.append(option_record(millis_on(day(), 12), "A", 1.0)).await.unwrap();
        log.append(option_record(millis_on(next_day, 9), "B", 2.0)).await.unwrap();

        let first = read_partition_file(&partition_path(dir.path(), day())).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].symbol(), "A");
        assert!(!partition_path(dir.path(), next_day).exists());
        assert_eq!(log.buffered().await, 1);

        log.flush().await.unwrap();
        let second = read_partition_file(&partition_path(dir.path(), next_day)).unwrap();
        assert_eq!(second[0].symbol(), "B");
    }

    #[tokio::test]
    async fn failed_flush_keeps_records_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let log = ParquetQuoteLog::new(&blocker, 1000);

        log.append(option_record(millis_on(day(), 10), "A", 1.0)).await.unwrap();
        assert!(matches!(log.flush().await, Err(SinkError::Storage(_))));
        assert_eq!(log.buffered().await, 1);
    }

    #[tokio::test]
    async fn failed_rollover_flush_keeps_incoming_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let log = ParquetQuoteLog::new(&blocker, 1000);
        let next_day = day() + ChronoDuration::days(1);

        log.append(option_record(millis_on(day(), 12), "A", 1.0)).await.unwrap();
        let rolled = log.append(option_record(millis_on(next_day, 9), "B", 2.0)).await;

        assert!(matches!(rolled, Err(SinkError::Storage(_))));
        assert_eq!(log.buffered().await, 2);
    }

    #[tokio::test]
    async fn persistent_failure_bounds_backlog_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let log = ParquetQuoteLog::new(&blocker, 10).with_max_buffered(50);
        let at = millis_on(day(), 10);

        let mut failures = 0;
        for i in 0..500 {
            let record = option_record(at + i, &i.to_string(), 1.0);
            if log.append(record).await.is_err() {
                failures += 1;
            }
        }

        // First attempt at the 10th append, then one per 10 appends.
        assert_eq!(failures, 50);
        assert_eq!(log.buffered().await, 50);

        fs::remove_file(&blocker).unwrap();
        fs::create_dir(&blocker).unwrap();
        log.flush().await.unwrap();
        assert_eq!(log.buffered().await, 0);

        let read = read_partition_file(&partition_path(&blocker, day())).unwrap();
        assert_eq!(read.len(), 50);
        assert_eq!(read[0].symbol(), "450");
        assert_eq!(read[49].symbol(), "499");
    }

    #[tokio::test]
    async fn successful_flush_restores_batch_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let log = ParquetQuoteLog::new(&blocker, 2);
        let at = millis_on(day(), 10);

        log.append(option_record(at, "A", 1.0)).await.unwrap();
        assert!(log.append(option_record(at + 1, "B", 1.0)).await.is_err());

        fs::remove_file(&blocker).unwrap();
        fs::create_dir(&blocker).unwrap();
        log.flush().await.unwrap();

        log.append(option_record(at + 2, "C", 1.0)).await.unwrap();
        log.append(option_record(at + 3, "D", 1.0)).await.unwrap();
        assert_eq!(log.buffered().await, 0);
    }

    #[tokio::test]
    async fn missing_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ParquetPartitionReader::new(dir.path());
        assert!(reader.read_partition(day()).await.unwrap().is_empty());
    }

    #[test]
    fn no_temporary_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = partition_path(dir.path(), day());
        let record = option_record(millis_on(day(), 10), "A", 1.0);
        append_partition(&path, &[&record]).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["quotes_2024-12-18.parquet".to_string()]);
    }
}
