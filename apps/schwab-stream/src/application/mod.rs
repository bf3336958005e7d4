//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (sinks, REST, credentials, alerts).
pub mod ports;

/// Application services for session control, supervision, and monitoring.
pub mod services;
