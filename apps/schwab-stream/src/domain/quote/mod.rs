//! Quote Record
//!
//! The normalized tick produced by the stream client for every accepted
//! update. Both sinks consume the same record: the cache stores it as JSON
//! under the symbol key, the durable log stores it as a Parquet row.
//!
//! A record has no identity beyond `(symbol, received_at)`; duplicates are
//! acceptable and never deduplicated.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-code to value mapping carried by a record.
pub type QuoteFields = Map<String, Value>;

/// One normalized market-data update for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    received_at: i64,
    symbol: String,
    #[serde(flatten)]
    fields: QuoteFields,
}

impl QuoteRecord {
    /// Create a record from its parts.
    #[must_use]
    pub fn new(received_at: i64, symbol: impl Into<String>, fields: QuoteFields) -> Self {
        Self {
            received_at,
            symbol: symbol.into(),
            fields,
        }
    }

    /// Build a record from a raw feed content item.
    ///
    /// The `key` entry names the symbol and is not kept among the fields.
    /// Returns `None` when the item carries no string key.
    #[must_use]
    pub fn from_content(received_at: i64, mut content: QuoteFields) -> Option<Self> {
        let symbol = match content.remove("key")? {
            Value::String(s) => s,
            _ => return None,
        };
        Some(Self::new(received_at, symbol, content))
    }

    /// Epoch milliseconds at which the tick was received.
    #[must_use]
    pub const fn received_at(&self) -> i64 {
        self.received_at
    }

    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Remaining feed fields, keyed by field code.
    #[must_use]
    pub const fn fields(&self) -> &QuoteFields {
        &self.fields
    }

    /// Look up a single field by code.
    #[must_use]
    pub fn field(&self, code: &str) -> Option<&Value> {
        self.fields.get(code)
    }

    /// Age of the record relative to `now_ms`, clamped at zero.
    #[must_use]
    pub const fn age_ms(&self, now_ms: i64) -> i64 {
        let age = now_ms.saturating_sub(self.received_at);
        if age < 0 { 0 } else { age }
    }
}
