//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alert notifiers (log, webhook).
pub mod alert;

/// Quote cache sinks (Redis, in-memory).
pub mod cache;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Schwab streamer and REST adapters.
pub mod schwab;

/// Parquet durable log.
pub mod storage;

/// OpenTelemetry tracing integration.
pub mod telemetry;
