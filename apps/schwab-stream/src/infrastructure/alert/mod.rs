//! Alert Notifiers
//!
//! Implementations of the `Notifier` port. Delivery never fails from the
//! caller's point of view: transport errors fall back to an error log line.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::Notifier;

/// Writes alerts to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create a new log notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        tracing::error!(subject = %subject, body = %body, "Alert");
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    text: String,
}

/// Posts alerts as JSON to a webhook.
///
/// The payload carries `subject`, `body`, and a combined `text` field so
/// chat webhooks render it without a custom template.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        let payload = WebhookPayload {
            subject,
            body,
            text: format!("{subject}\n{body}"),
        };

        let outcome = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        match outcome {
            Ok(_) => tracing::info!(subject = %subject, "Alert delivered"),
            Err(e) => tracing::error!(
                subject = %subject,
                body = %body,
                error = %e,
                "Alert delivery failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn webhook_posts_subject_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "subject": "ALERT",
                "body": "details",
                "text": "ALERT\ndetails"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::new(format!("{}/hook", server.uri()), Duration::from_secs(5)).unwrap();
        notifier.notify("ALERT", "details").await;
    }

    #[tokio::test]
    async fn webhook_failure_does_not_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(5)).unwrap();
        notifier.notify("ALERT", "details").await;
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier::new().notify("ALERT", "details").await;
    }
}
