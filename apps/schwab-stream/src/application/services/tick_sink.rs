//! Tick Sink
//!
//! Fans each accepted record out to the cache, then the durable log. Both
//! writes are best-effort: a failure is logged and counted, and ingestion
//! continues. Losing a tick is preferable to stalling the stream.

use std::sync::Arc;

use crate::application::ports::{QuoteCache, QuoteLog, SinkError};
use crate::domain::quote::QuoteRecord;
use crate::infrastructure::metrics::{self, SinkKind};

/// Cache and durable-log write paths.
#[derive(Clone)]
pub struct TickSink {
    cache: Arc<dyn QuoteCache>,
    log: Arc<dyn QuoteLog>,
}

impl std::fmt::Debug for TickSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSink").finish_non_exhaustive()
    }
}

impl TickSink {
    /// Create a sink over both write paths.
    #[must_use]
    pub fn new(cache: Arc<dyn QuoteCache>, log: Arc<dyn QuoteLog>) -> Self {
        Self { cache, log }
    }

    /// Write one record to both paths.
    pub async fn accept(&self, record: QuoteRecord) {
        if let Err(e) = self.cache.upsert(&record).await {
            tracing::warn!(symbol = %record.symbol(), error = %e, "Cache write failed");
            metrics::record_sink_failure(SinkKind::Cache);
        }

        let symbol = record.symbol().to_string();
        if let Err(e) = self.log.append(record).await {
            tracing::warn!(symbol = %symbol, error = %e, "Durable log write failed");
            metrics::record_sink_failure(SinkKind::Log);
        }
    }

    /// Flush the durable log unconditionally.
    ///
    /// # Errors
    ///
    /// Returns the durable log's error if the final flush fails.
    pub async fn flush(&self) -> Result<(), SinkError> {
        self.log.flush().await
    }
}
