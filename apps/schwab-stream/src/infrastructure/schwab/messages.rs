//! Schwab Streamer Message Types
//!
//! Wire format types for the Schwab push feed.
//!
//! # Outbound
//!
//! Every frame sent is wrapped as `{"requests": [...]}`. The first request on a
//! socket is an `ADMIN`/`LOGIN`; subscriptions follow as `SUBS` requests.
//!
//! # Inbound
//!
//! Frames are JSON objects that may carry any of three arrays:
//! - `data`: service blocks with quote content
//! - `response`: acknowledgements of our requests
//! - `notify`: heartbeats
//!
//! Each block is classified into a [`StreamEvent`] keyed by its `service`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::StreamerInfo;
use crate::domain::quote::QuoteFields;

/// Request id of the login request.
pub const LOGIN_REQUEST_ID: u32 = 0;
/// Request id of the option subscription.
pub const OPTIONS_REQUEST_ID: u32 = 1;
/// Request id of the underlying subscription.
pub const EQUITIES_REQUEST_ID: u32 = 2;

/// Option fields: symbol, last, close.
pub const OPTION_FIELDS: &str = "0,37,38";
/// Underlying fields: symbol, last, trade time.
pub const EQUITY_FIELDS: &str = "0,3,35";
/// An option tick without this field is partial.
pub const OPTION_MANDATORY_FIELD: &str = "37";
/// Underlying price field.
pub const EQUITY_PRICE_FIELD: &str = "3";

// =============================================================================
// Services and Commands
// =============================================================================

/// Streamer service names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Service {
    /// Session administration.
    #[serde(rename = "ADMIN")]
    Admin,
    /// Level one option quotes.
    #[serde(rename = "LEVELONE_OPTIONS")]
    LevelOneOptions,
    /// Level one equity and index quotes.
    #[serde(rename = "LEVELONE_EQUITIES")]
    LevelOneEquities,
}

impl Service {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::LevelOneOptions => "LEVELONE_OPTIONS",
            Self::LevelOneEquities => "LEVELONE_EQUITIES",
        }
    }
}

/// Request commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Authenticate the socket.
    Login,
    /// Replace the subscription for a service.
    Subs,
}

// =============================================================================
// Outbound
// =============================================================================

/// Request parameters. Login and subscription requests use disjoint keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestParameters {
    /// Login parameters.
    Login {
        /// Trade access token.
        #[serde(rename = "Authorization")]
        authorization: String,
        /// Client channel.
        #[serde(rename = "SchwabClientChannel")]
        channel: String,
        /// Client function id.
        #[serde(rename = "SchwabClientFunctionId")]
        function_id: String,
    },
    /// Subscription parameters.
    Subscribe {
        /// Comma-joined symbols.
        keys: String,
        /// Comma-joined field codes.
        fields: String,
    },
}

/// One streamer request.
///
/// # Wire Format (JSON)
/// ```json
/// {"service": "LEVELONE_OPTIONS", "command": "SUBS", "requestid": 1,
///  "SchwabClientCustomerId": "...", "SchwabClientCorrelId": "...",
///  "parameters": {"keys": "SPXW  241218C05000000", "fields": "0,37,38"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    /// Target service.
    pub service: Service,
    /// Command.
    pub command: Command,
    /// Request id echoed in responses.
    pub requestid: u32,
    /// Client customer id.
    #[serde(rename = "SchwabClientCustomerId")]
    pub customer_id: String,
    /// Client correlation id.
    #[serde(rename = "SchwabClientCorrelId")]
    pub correl_id: String,
    /// Command parameters.
    pub parameters: RequestParameters,
}

impl StreamRequest {
    /// Admin login carrying the trade token.
    #[must_use]
    pub fn login(info: &StreamerInfo, trade_token: &str) -> Self {
        Self {
            service: Service::Admin,
            command: Command::Login,
            requestid: LOGIN_REQUEST_ID,
            customer_id: info.customer_id.clone(),
            correl_id: info.correl_id.clone(),
            parameters: RequestParameters::Login {
                authorization: trade_token.to_string(),
                channel: info.channel.clone(),
                function_id: info.function_id.clone(),
            },
        }
    }

    /// Level one option subscription for the whole grid.
    #[must_use]
    pub fn option_subscription(info: &StreamerInfo, symbols: &[String]) -> Self {
        Self::subscription(
            info,
            Service::LevelOneOptions,
            OPTIONS_REQUEST_ID,
            symbols.join(","),
            OPTION_FIELDS,
        )
    }

    /// Level one subscription for the underlying.
    #[must_use]
    pub fn underlying_subscription(info: &StreamerInfo, underlying: &str) -> Self {
        Self::subscription(
            info,
            Service::LevelOneEquities,
            EQUITIES_REQUEST_ID,
            underlying.to_string(),
            EQUITY_FIELDS,
        )
    }

    fn subscription(
        info: &StreamerInfo,
        service: Service,
        requestid: u32,
        keys: String,
        fields: &str,
    ) -> Self {
        Self {
            service,
            command: Command::Subs,
            requestid,
            customer_id: info.customer_id.clone(),
            correl_id: info.correl_id.clone(),
            parameters: RequestParameters::Subscribe {
                keys,
                fields: fields.to_string(),
            },
        }
    }
}

/// Outbound frame envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestFrame {
    /// Requests in this frame.
    pub requests: Vec<StreamRequest>,
}

impl From<StreamRequest> for RequestFrame {
    fn from(request: StreamRequest) -> Self {
        Self {
            requests: vec![request],
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Raw inbound block before classification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBlock {
    /// Service tag.
    #[serde(default)]
    pub service: Option<String>,
    /// Response or notify payload.
    #[serde(default)]
    pub content: Value,
}

/// Raw inbound frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFrame {
    /// Quote data blocks.
    #[serde(default)]
    pub data: Vec<RawBlock>,
    /// Request acknowledgements.
    #[serde(default)]
    pub response: Vec<RawBlock>,
    /// Heartbeats.
    #[serde(default)]
    pub notify: Vec<Value>,
}

/// One classified inbound block.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Admin or request acknowledgement.
    Admin(Value),
    /// The feed rejected the service. Fatal for the connection.
    InvalidService,
    /// Keep-alive notification.
    Heartbeat,
    /// Option quote contents, one map per symbol.
    OptionQuotes(Vec<QuoteFields>),
    /// Equity quote contents, one map per symbol.
    EquityQuotes(Vec<QuoteFields>),
    /// Any other service.
    Unknown {
        /// Service tag, if present.
        service: Option<String>,
    },
}

impl StreamEvent {
    /// Classify a `data` block by its service tag.
    #[must_use]
    pub fn from_data_block(block: RawBlock) -> Self {
        match block.service.as_deref() {
            Some("ADMIN") => Self::Admin(block.content),
            Some("Invalid Service") => Self::InvalidService,
            Some("HEARTBEAT") => Self::Heartbeat,
            Some("LEVELONE_OPTIONS") => Self::OptionQuotes(content_maps(block.content)),
            Some("LEVELONE_EQUITIES") => Self::EquityQuotes(content_maps(block.content)),
            _ => Self::Unknown {
                service: block.service,
            },
        }
    }

    /// Metrics label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Admin(_) => "admin",
            Self::InvalidService => "invalid_service",
            Self::Heartbeat => "heartbeat",
            Self::OptionQuotes(_) => "options",
            Self::EquityQuotes(_) => "equities",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Keep only the object entries of a content array.
fn content_maps(content: Value) -> Vec<QuoteFields> {
    match content {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
