//! Configuration Module
//!
//! Configuration loading and dependency injection for the stream service.

mod settings;

pub use settings::{
    ApiSettings, CacheBackend, ConfigError, GridSettings, MonitorSettings, OAuthCredentials,
    ServerSettings, SinkSettings, StreamConfig, StreamSettings,
};
