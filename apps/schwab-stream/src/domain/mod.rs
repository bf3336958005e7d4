//! Domain Layer - Core quote-capture types and algorithms.
//!
//! Pure types with no I/O: the quote record, strike-grid symbol generation,
//! the daily session window, connection liveness assessment, and sink
//! freshness evaluation.

/// Normalized tick record shared by both sinks.
pub mod quote;

/// Strike-grid option symbol generation.
pub mod symbols;

/// Daily run window.
pub mod session;

/// Connection state and watchdog assessment.
pub mod liveness;

/// Sink freshness facts and two-strikes alerting.
pub mod freshness;
