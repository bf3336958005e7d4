//! Redis Quote Cache
//!
//! One string key per symbol, `<namespace>:<symbol>`, holding the JSON
//! record with a fixed expiry. Redis drops expired keys itself, so every
//! read only ever sees entries inside the TTL.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::application::ports::{QuoteCache, SinkError};
use crate::domain::quote::QuoteRecord;
use crate::infrastructure::metrics::{self, SinkKind};

/// Redis-backed cache sink.
#[derive(Clone)]
pub struct RedisQuoteCache {
    conn: ConnectionManager,
    namespace: String,
    ttl_secs: u64,
}

impl std::fmt::Debug for RedisQuoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQuoteCache")
            .field("namespace", &self.namespace)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl RedisQuoteCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str, namespace: &str, ttl: Duration) -> Result<Self, SinkError> {
        tracing::info!(namespace = %namespace, ttl_secs = ttl.as_secs(), "Connecting to Redis");

        let client = redis::Client::open(url).map_err(|e| SinkError::Cache(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))?;

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    fn key(&self, symbol: &str) -> String {
        cache_key(&self.namespace, symbol)
    }
}

/// `<namespace>:<symbol>`.
#[must_use]
pub fn cache_key(namespace: &str, symbol: &str) -> String {
    format!("{namespace}:{symbol}")
}

/// Escape glob metacharacters for `SCAN MATCH`.
fn glob_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn decode(json: &str) -> Result<QuoteRecord, SinkError> {
    serde_json::from_str(json).map_err(|e| SinkError::Serialization(e.to_string()))
}

/// Decode scanned values, skipping nils and undecodable entries.
///
/// Returns the records and the number of values skipped as undecodable.
fn decode_scanned(keys: &[String], values: Vec<Option<String>>) -> (Vec<QuoteRecord>, usize) {
    let mut records = Vec::with_capacity(values.len());
    let mut skipped = 0;
    // Keys that expired between SCAN and MGET come back as nil.
    for (key, json) in keys.iter().zip(values) {
        let Some(json) = json else { continue };
        match decode(&json) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping undecodable cache value");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

#[async_trait]
impl QuoteCache for RedisQuoteCache {
    async fn upsert(&self, record: &QuoteRecord) -> Result<(), SinkError> {
        let json =
            serde_json::to_string(record).map_err(|e| SinkError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(record.symbol()))
            .arg(json)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))
    }

    async fn latest(&self, symbol: &str) -> Result<Option<QuoteRecord>, SinkError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(self.key(symbol))
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))?;
        json.as_deref().map(decode).transpose()
    }

    async fn scan(&self, symbol_prefix: &str) -> Result<Vec<QuoteRecord>, SinkError> {
        let pattern = format!("{}*", glob_escape(&self.key(symbol_prefix)));
        let mut conn = self.conn.clone();

        let mut keys = Vec::new();
        {
            let mut iter = conn
                .scan_match::<_, String>(pattern)
                .await
                .map_err(|e| SinkError::Cache(e.to_string()))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))?;

        let (records, skipped) = decode_scanned(&keys, values);
        if skipped > 0 {
            metrics::record_records_discarded(SinkKind::Cache, skipped);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(cache_key("SPX:QUOTE", "$SPX"), "SPX:QUOTE:$SPX");
        assert_eq!(
            cache_key("SPX:QUOTE", "SPXW  241218C05000000"),
            "SPX:QUOTE:SPXW  241218C05000000"
        );
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(glob_escape("SPX:QUOTE:SPXW"), "SPX:QUOTE:SPXW");
        assert_eq!(glob_escape("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn cached_value_decodes_to_record() {
        let record = decode(r#"{"received_at":1,"symbol":"$SPX","3":5000.0}"#).unwrap();
        assert_eq!(record.symbol(), "$SPX");
        assert_eq!(record.field("3"), Some(&serde_json::json!(5000.0)));
        assert!(matches!(decode("{"), Err(SinkError::Serialization(_))));
    }

    #[test]
    fn scan_skips_nils_and_undecodable_values() {
        let keys: Vec<String> = ["SPX:QUOTE:A", "SPX:QUOTE:B", "SPX:QUOTE:C", "SPX:QUOTE:D"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let values = vec![
            Some(r#"{"received_at":1,"symbol":"A","37":1.0}"#.to_string()),
            None,
            Some("not json".to_string()),
            Some(r#"{"received_at":2,"symbol":"D","37":2.0}"#.to_string()),
        ];

        let (records, skipped) = decode_scanned(&keys, values);
        let symbols: Vec<&str> = records.iter().map(QuoteRecord::symbol).collect();
        assert_eq!(symbols, vec!["A", "D"]);
        assert_eq!(skipped, 1);
    }
}
