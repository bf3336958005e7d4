//! Schwab REST Client
//!
//! Quote and user-preference retrieval. A 401 surfaces as
//! [`ApiError::Unauthorized`] so the stream client can refresh and retry once.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{ApiError, MarketDataApi, StreamerInfo};
use crate::infrastructure::config::ApiSettings;

/// HTTP client for the market data and trader APIs.
#[derive(Debug, Clone)]
pub struct SchwabRestClient {
    client: Client,
    market_data_base_url: String,
    trader_base_url: String,
}

impl SchwabRestClient {
    /// Create a new client from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            client,
            market_data_base_url: settings.market_data_base_url.trim_end_matches('/').to_string(),
            trader_base_url: settings.trader_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl MarketDataApi for SchwabRestClient {
    async fn underlying_price(&self, symbol: &str, access_token: &str) -> Result<f64, ApiError> {
        let url = format!("{}/quotes", self.market_data_base_url);
        let body = self.get_json(&url, access_token, &[("symbols", symbol)]).await?;
        parse_last_price(&body, symbol)
    }

    async fn streamer_info(&self, access_token: &str) -> Result<StreamerInfo, ApiError> {
        let url = format!("{}/userPreference", self.trader_base_url);
        let body = self.get_json(&url, access_token, &[]).await?;
        parse_streamer_info(body)
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Extract `quote.lastPrice` from a quotes response keyed by symbol, falling
/// back to the first entry of a `quotes` or `data` list.
fn parse_last_price(body: &Value, symbol: &str) -> Result<f64, ApiError> {
    let entry = body
        .get(symbol)
        .filter(|v| !v.is_null())
        .or_else(|| {
            ["quotes", "data"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_array).and_then(|a| a.first()))
        })
        .ok_or_else(|| ApiError::InvalidResponse(format!("no quote returned for {symbol}")))?;

    let last = entry
        .get("quote")
        .and_then(|q| q.get("lastPrice"))
        .ok_or_else(|| ApiError::InvalidResponse(format!("no lastPrice for {symbol}")))?;

    let price = match last {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    price
        .filter(|p| p.is_finite())
        .ok_or_else(|| ApiError::InvalidResponse(format!("unparseable lastPrice for {symbol}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPreference {
    #[serde(default)]
    streamer_info: Vec<StreamerInfoWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamerInfoWire {
    streamer_socket_url: String,
    schwab_client_customer_id: String,
    schwab_client_correl_id: String,
    schwab_client_channel: String,
    schwab_client_function_id: String,
}

fn parse_streamer_info(body: Value) -> Result<StreamerInfo, ApiError> {
    let prefs: UserPreference =
        serde_json::from_value(body).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    let wire = prefs
        .streamer_info
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::InvalidResponse("userPreference has no streamerInfo".to_string()))?;

    Ok(StreamerInfo {
        socket_url: wire.streamer_socket_url,
        customer_id: wire.schwab_client_customer_id,
        correl_id: wire.schwab_client_correl_id,
        channel: wire.schwab_client_channel,
        function_id: wire.schwab_client_function_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SchwabRestClient {
        SchwabRestClient::new(&ApiSettings {
            market_data_base_url: format!("{}/marketdata/v1", server.uri()),
            trader_base_url: format!("{}/trader/v1", server.uri()),
            ..ApiSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn last_price_keyed_by_symbol() {
        let body = json!({"$SPX": {"quote": {"lastPrice": 5921.54}}});
        assert!((parse_last_price(&body, "$SPX").unwrap() - 5921.54).abs() < 1e-9);
    }

    #[test]
    fn last_price_list_fallback() {
        let body = json!({"quotes": [{"quote": {"lastPrice": "5000.25"}}]});
        assert!((parse_last_price(&body, "$SPX").unwrap() - 5000.25).abs() < 1e-9);
    }

    #[test]
    fn last_price_missing() {
        assert!(matches!(
            parse_last_price(&json!({}), "$SPX"),
            Err(ApiError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_last_price(&json!({"$SPX": {"quote": {}}}), "$SPX"),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn fetches_underlying_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/quotes"))
            .and(query_param("symbols", "$SPX"))
            .and(header("authorization", "Bearer data-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"$SPX": {"quote": {"lastPrice": 5000.0}}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let price = client(&server)
            .underlying_price("$SPX", "data-token")
            .await
            .unwrap();
        assert!((price - 5000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unauthorized_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/quotes"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).underlying_price("$SPX", "stale").await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/quotes"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let result = client(&server).underlying_price("$SPX", "t").await;
        assert!(matches!(result, Err(ApiError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn fetches_streamer_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trader/v1/userPreference"))
            .and(header("authorization", "Bearer trade-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accounts": [],
                "streamerInfo": [{
                    "streamerSocketUrl": "wss://streamer-api.schwab.com/ws",
                    "schwabClientCustomerId": "cust",
                    "schwabClientCorrelId": "corr",
                    "schwabClientChannel": "N9",
                    "schwabClientFunctionId": "APIAPP"
                }]
            })))
            .mount(&server)
            .await;

        let info = client(&server).streamer_info("trade-token").await.unwrap();
        assert_eq!(info.socket_url, "wss://streamer-api.schwab.com/ws");
        assert_eq!(info.customer_id, "cust");
        assert_eq!(info.function_id, "APIAPP");
    }

    #[tokio::test]
    async fn empty_streamer_info_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trader/v1/userPreference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"streamerInfo": []})))
            .mount(&server)
            .await;

        let result = client(&server).streamer_info("t").await;
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }
}
