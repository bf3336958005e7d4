//! Cache Sinks
//!
//! Implementations of the `QuoteCache` port.

mod memory;
mod redis_cache;

pub use memory::MemoryQuoteCache;
pub use redis_cache::{RedisQuoteCache, cache_key};
