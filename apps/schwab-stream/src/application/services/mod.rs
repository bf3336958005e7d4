//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SharedStreamState`: connection and liveness state under one lock
//! - `Watchdog`: periodic forced-reconnect supervisor
//! - `TickSink`: cache and durable-log fan-out
//! - `SessionController`: daily reconnect loop
//! - `FreshnessMonitor`: two-sink freshness checks with two-strikes alerting

pub mod freshness_monitor;
pub mod session;
pub mod stream_state;
pub mod tick_sink;
pub mod watchdog;

pub use freshness_monitor::{ALERT_SUBJECT, FreshnessMonitor};
pub use session::{SessionController, SessionEnd, SessionSummary};
pub use stream_state::{SharedStreamState, StreamSnapshot};
pub use tick_sink::TickSink;
pub use watchdog::Watchdog;
