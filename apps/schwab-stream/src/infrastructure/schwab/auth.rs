//! OAuth Credential Provider
//!
//! Refresh-token grant against the Schwab token endpoint with HTTP Basic
//! client authentication. Transient failures are retried with backoff;
//! a rejected refresh credential fails immediately.
//!
//! The data token is refreshed on every request. The trade token is cached
//! until shortly before it expires. Without separate trade credentials the
//! data app serves both roles.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

use crate::application::ports::{CredentialError, CredentialProvider};
use crate::infrastructure::config::{ApiSettings, OAuthCredentials};
use crate::infrastructure::schwab::retry::{RetryConfig, RetryPolicy};

/// Cached tokens are renewed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

const fn default_expires_in() -> u64 {
    1800
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

enum Attempt {
    Retry(String),
    Fatal(CredentialError),
}

/// Token endpoint client for one OAuth app.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client: Client,
    token_url: String,
    credentials: OAuthCredentials,
    retry: RetryConfig,
}

impl OAuthClient {
    /// Create a client for one set of app credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &ApiSettings, credentials: OAuthCredentials) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| CredentialError::Rejected(e.to_string()))?;

        Ok(Self {
            client,
            token_url: format!("{}/oauth/token", settings.oauth_base_url.trim_end_matches('/')),
            credentials,
            retry: RetryConfig::from_api_settings(settings),
        })
    }

    /// Exchange the refresh token, retrying transient failures.
    async fn refresh(&self) -> Result<TokenResponse, CredentialError> {
        let mut policy = RetryPolicy::new(self.retry.clone());

        loop {
            let last_error = match self.attempt().await {
                Ok(token) => return Ok(token),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(message)) => message,
            };

            let Some(delay) = policy.next_delay() else {
                return Err(CredentialError::RefreshExhausted {
                    attempts: policy.attempt_count(),
                    last_error,
                });
            };

            tracing::warn!(
                error = %last_error,
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Token refresh failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self) -> Result<TokenResponse, Attempt> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(self.credentials.client_id(), Some(self.credentials.client_secret()))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.credentials.refresh_token()),
            ])
            .send()
            .await
            .map_err(|e| Attempt::Retry(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(Attempt::Fatal(CredentialError::Rejected(format!(
                "HTTP {}: {body}",
                status.as_u16()
            ))));
        }
        if !status.is_success() {
            return Err(Attempt::Retry(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Attempt::Retry(e.to_string()))
    }
}

/// Data and trade token source.
#[derive(Debug)]
pub struct SchwabCredentialProvider {
    data: OAuthClient,
    trade: Option<OAuthClient>,
    trade_cache: Mutex<Option<CachedToken>>,
}

impl SchwabCredentialProvider {
    /// Create a provider. `trade` is `None` in single-API mode.
    #[must_use]
    pub const fn new(data: OAuthClient, trade: Option<OAuthClient>) -> Self {
        Self {
            data,
            trade,
            trade_cache: Mutex::new(None),
        }
    }

    fn cached_trade_token(&self, now: Instant) -> Option<String> {
        self.trade_cache
            .lock()
            .as_ref()
            .filter(|cached| cached.expires_at > now + EXPIRY_MARGIN)
            .map(|cached| cached.access_token.clone())
    }
}

#[async_trait]
impl CredentialProvider for SchwabCredentialProvider {
    async fn refresh_data_token(&self) -> Result<String, CredentialError> {
        let token = self.data.refresh().await?;
        tracing::debug!(expires_in = token.expires_in, "Refreshed data token");
        Ok(token.access_token)
    }

    async fn trade_token(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.cached_trade_token(Instant::now()) {
            return Ok(token);
        }

        let client = self.trade.as_ref().unwrap_or(&self.data);
        let token = client.refresh().await?;
        tracing::debug!(expires_in = token.expires_in, "Refreshed trade token");

        *self.trade_cache.lock() = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }
}
