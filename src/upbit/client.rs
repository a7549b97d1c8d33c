//! Upbit REST client
//!
//! One shared client behind the whole system: pooled connections, a
//! sliding-window rate limiter, and retry with exponential backoff for
//! transient failures. Authentication failures and venue rejections are
//! never retried here; the venue owns idempotency for those.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::auth;
use super::ratelimit::SlidingWindowLimiter;
use super::types::{Account, MarketInfo, OrderInfo, OrderbookSnapshot, RawCandle, TickerData};
use crate::config::{Credentials, ExchangeConfig};

/// Gateway error kinds. `Transient` means retries were already exhausted.
#[derive(Debug, Error)]
pub enum UpbitError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("venue rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transient gateway failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("failed to decode venue response: {0}")]
    Decode(String),

    #[error("API credentials not configured")]
    MissingCredentials,
}

impl UpbitError {
    /// Whether the caller may drop the affected market and continue the tick
    pub fn is_transient(&self) -> bool {
        matches!(self, UpbitError::Transient { .. })
    }
}

#[derive(Clone)]
pub struct UpbitClient {
    config: ExchangeConfig,
    credentials: Option<Credentials>,
    http: Client,
    limiter: std::sync::Arc<SlidingWindowLimiter>,
}

impl UpbitClient {
    pub fn new(config: ExchangeConfig, credentials: Option<Credentials>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to build HTTP client");

        let limiter =
            std::sync::Arc::new(SlidingWindowLimiter::per_minute(config.requests_per_minute));

        Self {
            config,
            credentials,
            http,
            limiter,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Execute a request with rate limiting and transient-failure retry.
    ///
    /// Parameters ride as the query string for GET/DELETE and as a JSON
    /// body for POST; either way they are covered by the auth query hash.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        require_auth: bool,
    ) -> Result<T, UpbitError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut last_message = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs_f64(
                    2f64.powi(attempt as i32 - 1) * self.config.retry_backoff_secs,
                );
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %url,
                    "retrying gateway request"
                );
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;

            let mut request = self.http.request(method.clone(), &url);

            if method == Method::GET || method == Method::DELETE {
                if !params.is_empty() {
                    request = request.query(params);
                }
            } else {
                let body: HashMap<&str, &str> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                request = request.json(&body);
            }

            if require_auth {
                let creds = self
                    .credentials
                    .as_ref()
                    .ok_or(UpbitError::MissingCredentials)?;
                let token = auth::build_jwt(&creds.access_key, &creds.secret_key, params);
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_message = format!("transport error: {}", e);
                    warn!(attempt, %url, error = %e, "gateway request failed");
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            match status {
                StatusCode::OK | StatusCode::CREATED => {
                    return serde_json::from_str(&text)
                        .map_err(|e| UpbitError::Decode(format!("{} ({})", e, path)));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    last_message = "rate limited (429)".to_string();
                    warn!(attempt, %url, "venue rate limit response");
                    continue;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(UpbitError::Auth(extract_error_message(&text)));
                }
                s if s.is_server_error() => {
                    last_message = format!("server error ({})", s.as_u16());
                    warn!(attempt, %url, status = s.as_u16(), "venue server error");
                    continue;
                }
                s => {
                    return Err(UpbitError::Rejected {
                        status: s.as_u16(),
                        message: extract_error_message(&text),
                    });
                }
            }
        }

        error!(%url, attempts = self.config.max_retries + 1, "gateway retries exhausted");
        Err(UpbitError::Transient {
            attempts: self.config.max_retries + 1,
            message: last_message,
        })
    }

    // ==================== PUBLIC MARKET DATA ====================

    /// Market list with warning flags
    pub async fn get_markets(&self) -> Result<Vec<MarketInfo>, UpbitError> {
        let params = vec![("isDetails".to_string(), "true".to_string())];
        self.request(Method::GET, "/v1/market/all", &params, false)
            .await
    }

    /// Minute candles for one market, newest first as the venue returns them
    pub async fn get_candles(
        &self,
        market: &str,
        unit: u32,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<RawCandle>, UpbitError> {
        let mut params = vec![
            ("market".to_string(), market.to_string()),
            ("count".to_string(), count.min(200).to_string()),
        ];
        if let Some(to) = to {
            params.push(("to".to_string(), to.to_string()));
        }
        let path = format!("/v1/candles/minutes/{}", unit);
        self.request(Method::GET, &path, &params, false).await
    }

    /// Candles for many markets fetched concurrently.
    ///
    /// Individual failures drop that market from the result; the scan tick
    /// proceeds with whatever arrived.
    pub async fn get_multiple_candles(
        &self,
        markets: &[String],
        unit: u32,
        count: u32,
    ) -> HashMap<String, Vec<RawCandle>> {
        let futures = markets
            .iter()
            .map(|market| self.get_candles(market, unit, count, None));
        let results = join_all(futures).await;

        let mut candles = HashMap::new();
        for (market, result) in markets.iter().zip(results) {
            match result {
                Ok(batch) => {
                    candles.insert(market.clone(), batch);
                }
                Err(e) => {
                    warn!(market = %market, error = %e, "candle fetch failed, dropping market for this tick");
                }
            }
        }

        debug!(
            requested = markets.len(),
            received = candles.len(),
            "multi-market candle fetch complete"
        );
        candles
    }

    /// Ticker batch by comma-joined market list
    pub async fn get_tickers(&self, markets: &[String]) -> Result<Vec<TickerData>, UpbitError> {
        let params = vec![("markets".to_string(), markets.join(","))];
        self.request(Method::GET, "/v1/ticker", &params, false).await
    }

    /// Orderbook batch by comma-joined market list
    pub async fn get_orderbook(
        &self,
        markets: &[String],
    ) -> Result<Vec<OrderbookSnapshot>, UpbitError> {
        let params = vec![("markets".to_string(), markets.join(","))];
        self.request(Method::GET, "/v1/orderbook", &params, false)
            .await
    }

    // ==================== PRIVATE ENDPOINTS ====================

    /// Account balances
    pub async fn get_accounts(&self) -> Result<Vec<Account>, UpbitError> {
        self.request(Method::GET, "/v1/accounts", &[], true).await
    }

    /// Single order by venue uuid
    pub async fn get_order(&self, uuid: &str) -> Result<OrderInfo, UpbitError> {
        let params = vec![("uuid".to_string(), uuid.to_string())];
        self.request(Method::GET, "/v1/order", &params, true).await
    }

    /// Orders filtered by market and state
    pub async fn get_orders(
        &self,
        market: Option<&str>,
        state: &str,
    ) -> Result<Vec<OrderInfo>, UpbitError> {
        let mut params = vec![("state".to_string(), state.to_string())];
        if let Some(market) = market {
            params.push(("market".to_string(), market.to_string()));
        }
        self.request(Method::GET, "/v1/orders", &params, true).await
    }

    /// Place an order. `side` is the venue's "bid"/"ask" convention.
    pub async fn place_order(
        &self,
        market: &str,
        side: &str,
        ord_type: &str,
        volume: Option<&str>,
        price: Option<&str>,
        time_in_force: Option<&str>,
    ) -> Result<OrderInfo, UpbitError> {
        let mut params = vec![
            ("market".to_string(), market.to_string()),
            ("side".to_string(), side.to_string()),
            ("ord_type".to_string(), ord_type.to_string()),
        ];
        if let Some(volume) = volume {
            params.push(("volume".to_string(), volume.to_string()));
        }
        if let Some(price) = price {
            params.push(("price".to_string(), price.to_string()));
        }
        if let Some(tif) = time_in_force {
            params.push(("time_in_force".to_string(), tif.to_string()));
        }
        self.request(Method::POST, "/v1/orders", &params, true).await
    }

    /// Cancel a single order
    pub async fn cancel_order(&self, uuid: &str) -> Result<OrderInfo, UpbitError> {
        let params = vec![("uuid".to_string(), uuid.to_string())];
        self.request(Method::DELETE, "/v1/order", &params, true)
            .await
    }

    /// Cancel a batch of orders
    pub async fn cancel_orders(&self, uuids: &[String]) -> Result<Vec<OrderInfo>, UpbitError> {
        let params: Vec<(String, String)> = uuids
            .iter()
            .map(|u| ("uuids[]".to_string(), u.clone()))
            .collect();
        self.request(Method::DELETE, "/v1/orders", &params, true)
            .await
    }

    // ==================== UTILITY ====================

    /// Check the venue is reachable by probing the market list
    pub async fn health_check(&self) -> bool {
        match self.get_markets().await {
            Ok(markets) => !markets.is_empty(),
            Err(e) => {
                error!(error = %e, "health check failed");
                false
            }
        }
    }

    /// Requests inside the current rate-limit window
    pub async fn rate_limit_in_flight(&self) -> usize {
        self.limiter.in_flight().await
    }
}

/// Pull the human-readable message out of a venue error payload
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no error payload".to_string()
            } else {
                body.chars().take(200).collect()
            }
        })
}
