//! Stream Client
//!
//! Owns one physical connection to the Schwab streamer: the handshake,
//! the subscription set, and dispatch of inbound ticks into the tick sink.
//!
//! # Lifecycle
//!
//! `Idle -> Connecting -> Open -> Idle`. While connecting the client fetches
//! the streamer endpoint, opens the socket, refreshes the data token, reads
//! the underlying's reference price (retrying once after a refresh on 401),
//! generates the 0DTE strike grid, logs in with the trade token and, after a
//! settle delay, subscribes to the option grid and the underlying.
//!
//! The connection ends when the stop token fires (session end or watchdog),
//! the server closes, the transport fails, a keep-alive probe goes
//! unanswered, or the feed reports an invalid service. Every exit path
//! returns the shared state to `Idle`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{
    ApiError, ConnectionError, ConnectionRunner, CredentialError, CredentialProvider,
    MarketDataApi, Notifier, StreamerInfo,
};
use crate::application::services::{SharedStreamState, TickSink};
use crate::domain::quote::{QuoteFields, QuoteRecord};
use crate::domain::symbols::OptionSymbolGenerator;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::metrics::{self, TickKind};
use crate::infrastructure::schwab::codec::JsonCodec;
use crate::infrastructure::schwab::heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
use crate::infrastructure::schwab::messages::{
    EQUITY_PRICE_FIELD, OPTION_MANDATORY_FIELD, RequestFrame, StreamEvent, StreamRequest,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subject of the alert sent when credential refresh is exhausted.
pub const CREDENTIAL_ALERT_SUBJECT: &str = "ALERT: Schwab credential refresh failed";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Stream client settings.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Underlying symbol.
    pub underlying: String,
    /// Option root.
    pub option_root: String,
    /// Points above and below the reference price.
    pub strike_range: f64,
    /// Strike spacing.
    pub strike_step: f64,
    /// Delay between login and subscriptions.
    pub login_settle: Duration,
    /// Bound on the socket handshake.
    pub connect_timeout: Duration,
    /// Keep-alive probe timing.
    pub heartbeat: HeartbeatConfig,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            underlying: "$SPX".to_string(),
            option_root: "SPXW".to_string(),
            strike_range: 100.0,
            strike_step: 5.0,
            login_settle: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl StreamClientConfig {
    /// Create configuration from `StreamConfig`.
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            underlying: config.grid.underlying.clone(),
            option_root: config.grid.option_root.clone(),
            strike_range: config.grid.strike_range,
            strike_step: config.grid.strike_step,
            login_settle: config.stream.login_settle,
            connect_timeout: config.api.timeout,
            heartbeat: HeartbeatConfig::from_stream_settings(&config.stream),
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Schwab streamer connection runner.
pub struct StreamClient {
    config: StreamClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    api: Arc<dyn MarketDataApi>,
    notifier: Arc<dyn Notifier>,
    state: Arc<SharedStreamState>,
    sink: TickSink,
    codec: JsonCodec,
    generator: OptionSymbolGenerator,
    streamer_info: Mutex<Option<StreamerInfo>>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        api: Arc<dyn MarketDataApi>,
        notifier: Arc<dyn Notifier>,
        state: Arc<SharedStreamState>,
        sink: TickSink,
    ) -> Self {
        let generator = OptionSymbolGenerator::new(config.option_root.clone());
        Self {
            config,
            credentials,
            api,
            notifier,
            state,
            sink,
            codec: JsonCodec::new(),
            generator,
            streamer_info: Mutex::new(None),
        }
    }

    /// Handshake then dispatch until the connection ends.
    async fn connect_and_run(&self, stop: &CancellationToken) -> Result<(), ConnectionError> {
        let ws = tokio::select! {
            biased;
            () = stop.cancelled() => {
                tracing::info!("Stop requested during handshake");
                return Ok(());
            }
            result = self.handshake() => result?,
        };

        if !self.state.mark_open() {
            return Ok(());
        }
        tracing::info!("Connection open");

        self.dispatch(ws, stop).await
    }

    async fn handshake(&self) -> Result<WsStream, ConnectionError> {
        let trade_token = self.credentials.trade_token().await?;
        let info = self.streamer_info(&trade_token).await?;

        tracing::info!(url = %info.socket_url, "Connecting to streamer");
        let (mut ws, _response) = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(info.socket_url.as_str()),
        )
        .await
        .map_err(|_| ConnectionError::Transport("connect timed out".to_string()))?
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let price = self.fetch_reference_price().await?;
        self.state.set_reference_price(price);
        tracing::info!(price, underlying = %self.config.underlying, "Fetched reference price");

        let expiry = Local::now().date_naive();
        let symbols = self.subscription_set(price, expiry)?;
        tracing::info!(count = symbols.len(), %expiry, "Generated option symbols");

        self.send(&mut ws, StreamRequest::login(&info, &trade_token)).await?;
        tracing::info!("Sent admin login");
        tokio::time::sleep(self.config.login_settle).await;

        self.send(&mut ws, StreamRequest::option_subscription(&info, &symbols))
            .await?;
        self.send(
            &mut ws,
            StreamRequest::underlying_subscription(&info, &self.config.underlying),
        )
        .await?;
        tracing::info!(
            options = symbols.len(),
            underlying = %self.config.underlying,
            "Subscribed"
        );

        Ok(ws)
    }

    /// Streamer endpoint, fetched once and reused for the session.
    async fn streamer_info(&self, trade_token: &str) -> Result<StreamerInfo, ConnectionError> {
        if let Some(info) = self.streamer_info.lock().clone() {
            return Ok(info);
        }
        let info = self.api.streamer_info(trade_token).await?;
        *self.streamer_info.lock() = Some(info.clone());
        Ok(info)
    }

    /// Refresh the data token and read the underlying's last price,
    /// retrying exactly once after another refresh on 401.
    async fn fetch_reference_price(&self) -> Result<f64, ConnectionError> {
        let token = self.credentials.refresh_data_token().await?;
        match self.api.underlying_price(&self.config.underlying, &token).await {
            Ok(price) => Ok(price),
            Err(ApiError::Unauthorized) => {
                tracing::warn!("Quote request unauthorized, refreshing data token and retrying");
                let token = self.credentials.refresh_data_token().await?;
                Ok(self
                    .api
                    .underlying_price(&self.config.underlying, &token)
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn subscription_set(
        &self,
        price: f64,
        expiry: NaiveDate,
    ) -> Result<Vec<String>, ConnectionError> {
        Ok(self.generator.generate(
            price,
            self.config.strike_range,
            self.config.strike_step,
            expiry,
        )?)
    }

    async fn send(&self, ws: &mut WsStream, request: StreamRequest) -> Result<(), ConnectionError> {
        let text = self
            .codec
            .encode(&RequestFrame::from(request))
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    /// Read loop. Keep-alive probes run beside it on a child task.
    async fn dispatch(&self, ws: WsStream, stop: &CancellationToken) -> Result<(), ConnectionError> {
        let (mut write, mut read) = ws.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = stop.child_token();
        let heartbeat = tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                heartbeat_state.clone(),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        let result = loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    tracing::info!("Stop requested, closing connection");
                    break Ok(());
                }
                event = heartbeat_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        heartbeat_state.mark_ping_sent();
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            break Err(ConnectionError::Transport(e.to_string()));
                        }
                    }
                    Some(HeartbeatEvent::Timeout) => {
                        tracing::warn!("Keep-alive probe unanswered");
                        break Err(ConnectionError::KeepAliveTimeout);
                    }
                    None => {}
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat_state.record_pong();
                        if let Err(e) = self.handle_text(text.as_str()).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat_state.record_pong(),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break Err(ConnectionError::Transport(e.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Server sent close frame");
                        break Err(ConnectionError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ConnectionError::Transport(e.to_string())),
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break Err(ConnectionError::Closed);
                    }
                },
            }
        };

        heartbeat_cancel.cancel();
        let _ = heartbeat.await;
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
        result
    }

    /// Classify one text frame and apply each event.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Protocol`] when the feed reports an invalid
    /// service.
    pub async fn handle_text(&self, text: &str) -> Result<(), ConnectionError> {
        let events = match self.codec.decode(text) {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping undecodable frame");
                return Ok(());
            }
        };

        let received_at = Utc::now().timestamp_millis();
        for event in events {
            metrics::record_message_received(event.label());
            match event {
                StreamEvent::Admin(content) => {
                    tracing::info!(content = %content, "Admin response");
                }
                StreamEvent::InvalidService => {
                    tracing::error!("Feed reported invalid service, closing connection");
                    return Err(ConnectionError::Protocol("invalid service".to_string()));
                }
                StreamEvent::Heartbeat => tracing::trace!("Heartbeat"),
                StreamEvent::OptionQuotes(items) => {
                    for content in items {
                        self.accept_option(received_at, content).await;
                    }
                }
                StreamEvent::EquityQuotes(items) => {
                    for content in items {
                        self.accept_equity(received_at, content).await;
                    }
                }
                StreamEvent::Unknown { service } => {
                    tracing::debug!(service = ?service, "Ignoring unknown service");
                }
            }
        }
        Ok(())
    }

    async fn accept_option(&self, received_at: i64, content: QuoteFields) {
        if content
            .get(OPTION_MANDATORY_FIELD)
            .is_none_or(Value::is_null)
        {
            metrics::record_tick_dropped(TickKind::Option, "missing_field");
            return;
        }
        let Some(record) = QuoteRecord::from_content(received_at, content) else {
            metrics::record_tick_dropped(TickKind::Option, "missing_key");
            return;
        };

        self.state.record_message();
        metrics::record_tick_accepted(TickKind::Option);
        self.sink.accept(record).await;
    }

    async fn accept_equity(&self, received_at: i64, content: QuoteFields) {
        let Some(record) = QuoteRecord::from_content(received_at, content) else {
            metrics::record_tick_dropped(TickKind::Underlying, "missing_key");
            return;
        };
        if record.symbol() != self.config.underlying {
            metrics::record_tick_dropped(TickKind::Underlying, "foreign_symbol");
            return;
        }
        let Some(price) = record.field(EQUITY_PRICE_FIELD).and_then(parse_price) else {
            tracing::debug!(symbol = %record.symbol(), "Dropping underlying tick without a usable price");
            metrics::record_tick_dropped(TickKind::Underlying, "bad_price");
            return;
        };

        self.state.record_underlying(price);
        metrics::record_tick_accepted(TickKind::Underlying);
        self.sink.accept(record).await;
    }
}

/// Numeric or numeric-string price. Empty, non-finite, or other shapes are
/// rejected.
fn parse_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    price.is_finite().then_some(price)
}

#[async_trait]
impl ConnectionRunner for StreamClient {
    async fn run_connection(&self, stop: CancellationToken) -> Result<(), ConnectionError> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("connection", connection_id = %connection_id);

        self.state.begin_connect(&connection_id, stop.clone());
        let result = self.connect_and_run(&stop).instrument(span.clone()).await;
        self.state.mark_closed();

        if let Err(e) = &result {
            span.in_scope(|| tracing::error!(error = %e, "Connection ended with error"));
            if let ConnectionError::Credential(CredentialError::RefreshExhausted { .. }) = e {
                self.notifier
                    .notify(CREDENTIAL_ALERT_SUBJECT, &format!("{} - {e}", Local::now()))
                    .await;
                metrics::record_alert();
            }
        } else {
            span.in_scope(|| tracing::info!("Connection closed"));
        }
        result
    }
}
