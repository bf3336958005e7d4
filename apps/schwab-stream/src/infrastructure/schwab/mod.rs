//! Schwab Adapters
//!
//! Push-feed client and REST integrations:
//!
//! - `messages`: streamer wire types
//! - `codec`: JSON frame encoding and event classification
//! - `heartbeat`: keep-alive ping with a bounded pong wait
//! - `retry`: backoff for credential refresh
//! - `auth`: OAuth refresh-token provider
//! - `rest`: quotes and user preferences
//! - `client`: one streaming connection, run to completion

pub mod auth;
pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod rest;
pub mod retry;

pub use auth::{OAuthClient, SchwabCredentialProvider};
pub use client::{CREDENTIAL_ALERT_SUBJECT, StreamClient, StreamClientConfig};
pub use rest::SchwabRestClient;
