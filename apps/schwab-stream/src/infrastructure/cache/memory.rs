//! In-Memory Quote Cache
//!
//! Map-backed cache with per-key expiry for local runs and tests. Keys follow
//! the Redis layout, `<namespace>:<symbol>`. Expired entries are never
//! returned and are purged on the next write.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::application::ports::{QuoteCache, SinkError};
use crate::domain::quote::QuoteRecord;

use super::cache_key;

#[derive(Debug, Clone)]
struct Entry {
    record: QuoteRecord,
    expires_at: Instant,
}

/// Process-local cache sink.
#[derive(Debug)]
pub struct MemoryQuoteCache {
    entries: RwLock<HashMap<String, Entry>>,
    namespace: String,
    ttl: Duration,
}

impl MemoryQuoteCache {
    /// Create an empty cache under `namespace` with a fixed time-to-live.
    #[must_use]
    pub fn new(namespace: &str, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            namespace: namespace.to_string(),
            ttl,
        }
    }

    /// Number of unexpired entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether no unexpired entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QuoteCache for MemoryQuoteCache {
    async fn upsert(&self, record: &QuoteRecord) -> Result<(), SinkError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            cache_key(&self.namespace, record.symbol()),
            Entry {
                record: record.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<QuoteRecord>, SinkError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(&cache_key(&self.namespace, symbol))
            .filter(|e| e.expires_at > now)
            .map(|e| e.record.clone()))
    }

    async fn scan(&self, symbol_prefix: &str) -> Result<Vec<QuoteRecord>, SinkError> {
        let now = Instant::now();
        let prefix = cache_key(&self.namespace, symbol_prefix);
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(key, e)| key.starts_with(&prefix) && e.expires_at > now)
            .map(|(_, e)| e.record.clone())
            .collect())
    }
}
