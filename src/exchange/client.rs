// =============================================================================
// REST Client — HMAC-SHA256 signed requests against a Binance-family endpoint
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header plus a recvWindow of 5 000 ms to tolerate
// minor clock drift. The base URL is mode-dependent (production vs testnet)
// and injected by the adapter.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use super::rate_limit::RateLimitTracker;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Signed REST client. One per process; reqwest pools connections.
pub struct RestClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: RateLimitTracker,
}

impl RestClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client against `base_url`.
    ///
    /// # Arguments
    /// * `api_key` — sent as a header on every request, never in the query.
    /// * `secret`  — used exclusively for HMAC signing.
    pub fn new(api_key: &str, secret: &str, base_url: &str) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if !api_key.is_empty() {
            let val = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        debug!(base_url, "REST client initialised");

        Ok(Self {
            secret: secret.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            rate_limit: RateLimitTracker::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .context("failed to initialise HMAC")?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Full query string for a signed request (appends timestamp, recvWindow,
    /// and signature).
    fn signed_query(&self, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base)?;
        Ok(format!("{base}&signature={sig}"))
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// Send `request`, track rate-limit headers, surface non-2xx bodies as
    /// errors.
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<serde_json::Value> {
        let resp = request
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response"))?;

        if !status.is_success() {
            anyhow::bail!("{what} returned {status}: {body}");
        }
        Ok(body)
    }

    fn require_request_budget(&self, weight: u32, what: &str) -> Result<()> {
        if !self.rate_limit.can_send_request(weight) {
            anyhow::bail!("{what} refused locally — request weight budget exhausted");
        }
        Ok(())
    }

    fn require_order_budget(&self, what: &str) -> Result<()> {
        if !self.rate_limit.can_place_order() {
            anyhow::bail!("{what} refused locally — order rate budget exhausted");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Public endpoints
    // -------------------------------------------------------------------------

    /// GET /api/v3/ping — connectivity probe.
    #[instrument(skip(self), name = "rest::ping")]
    pub async fn ping(&self) -> Result<()> {
        self.require_request_budget(1, "ping")?;
        let url = format!("{}/api/v3/ping", self.base_url);
        self.send(self.client.get(&url), "GET /api/v3/ping").await?;
        Ok(())
    }

    /// GET /api/v3/exchangeInfo filtered to one symbol; returns the symbol
    /// entry.
    #[instrument(skip(self), name = "rest::exchange_info")]
    pub async fn exchange_info(&self, wire_symbol: &str) -> Result<serde_json::Value> {
        self.require_request_budget(10, "exchangeInfo")?;
        let url = format!(
            "{}/api/v3/exchangeInfo?symbol={wire_symbol}",
            self.base_url
        );
        let body = self
            .send(self.client.get(&url), "GET /api/v3/exchangeInfo")
            .await?;

        body["symbols"]
            .as_array()
            .and_then(|arr| arr.first().cloned())
            .context("symbol not found in exchangeInfo response")
    }

    /// GET /api/v3/ticker/price — last traded price.
    #[instrument(skip(self), name = "rest::ticker_price")]
    pub async fn ticker_price(&self, wire_symbol: &str) -> Result<f64> {
        self.require_request_budget(2, "ticker")?;
        let url = format!(
            "{}/api/v3/ticker/price?symbol={wire_symbol}",
            self.base_url
        );
        let body = self
            .send(self.client.get(&url), "GET /api/v3/ticker/price")
            .await?;
        parse_str_f64(&body["price"]).context("ticker response missing 'price'")
    }

    /// GET /api/v3/klines — recent close prices, oldest first.
    #[instrument(skip(self), name = "rest::klines")]
    pub async fn kline_closes(
        &self,
        wire_symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<f64>> {
        self.require_request_budget(2, "klines")?;
        let url = format!(
            "{}/api/v3/klines?symbol={wire_symbol}&interval={interval}&limit={limit}",
            self.base_url
        );
        let body = self
            .send(self.client.get(&url), "GET /api/v3/klines")
            .await?;

        let raw = body.as_array().context("klines response is not an array")?;
        let mut closes = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            // Index 4 is the close in the exchange's array-of-arrays layout.
            if let Some(close) = arr.get(4) {
                closes.push(parse_str_f64(close)?);
            }
        }
        Ok(closes)
    }

    // -------------------------------------------------------------------------
    // Signed endpoints — account
    // -------------------------------------------------------------------------

    /// GET /api/v3/account (signed).
    #[instrument(skip(self), name = "rest::account")]
    pub async fn account(&self) -> Result<serde_json::Value> {
        self.require_request_budget(10, "account")?;
        let qs = self.signed_query("")?;
        let url = format!("{}/api/v3/account?{qs}", self.base_url);
        self.send(self.client.get(&url), "GET /api/v3/account").await
    }

    /// Free balance of one asset. Missing assets read as zero.
    #[instrument(skip(self), name = "rest::balance_free")]
    pub async fn balance_free(&self, asset: &str) -> Result<f64> {
        let account = self.account().await?;
        let balances = account["balances"]
            .as_array()
            .context("account response missing 'balances' array")?;

        for b in balances {
            if b["asset"].as_str() == Some(asset) {
                let free = b["free"]
                    .as_str()
                    .unwrap_or("0")
                    .parse::<f64>()
                    .unwrap_or(0.0);
                debug!(asset, free, "balance retrieved");
                return Ok(free);
            }
        }
        debug!(asset, "asset not found in balances — returning 0.0");
        Ok(0.0)
    }

    // -------------------------------------------------------------------------
    // Signed endpoints — orders
    // -------------------------------------------------------------------------

    /// POST /api/v3/order (signed). `params` carries the prepared
    /// `key=value&...` pairs; amounts and prices must already be grid-floored
    /// strings.
    #[instrument(skip(self, params), name = "rest::post_order")]
    pub async fn post_order(&self, params: &str) -> Result<serde_json::Value> {
        self.require_request_budget(1, "order")?;
        self.require_order_budget("order")?;

        let qs = self.signed_query(params)?;
        let url = format!("{}/api/v3/order?{qs}", self.base_url);
        let body = self.send(self.client.post(&url), "POST /api/v3/order").await?;
        self.rate_limit.record_order_sent();
        Ok(body)
    }

    /// POST /api/v3/order/oco (signed) — native OCO order list.
    #[instrument(skip(self, params), name = "rest::post_oco")]
    pub async fn post_oco(&self, params: &str) -> Result<serde_json::Value> {
        self.require_request_budget(1, "oco order")?;
        self.require_order_budget("oco order")?;

        let qs = self.signed_query(params)?;
        let url = format!("{}/api/v3/order/oco?{qs}", self.base_url);
        let body = self
            .send(self.client.post(&url), "POST /api/v3/order/oco")
            .await?;
        self.rate_limit.record_order_sent();
        Ok(body)
    }

    /// GET /api/v3/order (signed) — lookup by order id.
    #[instrument(skip(self), name = "rest::get_order")]
    pub async fn get_order(&self, wire_symbol: &str, order_id: &str) -> Result<serde_json::Value> {
        self.require_request_budget(2, "order lookup")?;
        let params = format!("symbol={wire_symbol}&orderId={order_id}");
        let qs = self.signed_query(&params)?;
        let url = format!("{}/api/v3/order?{qs}", self.base_url);
        self.send(self.client.get(&url), "GET /api/v3/order").await
    }

    /// DELETE /api/v3/order (signed) — cancel by order id.
    #[instrument(skip(self), name = "rest::cancel_order")]
    pub async fn cancel_order(&self, wire_symbol: &str, order_id: &str) -> Result<serde_json::Value> {
        self.require_request_budget(1, "order cancel")?;
        let params = format!("symbol={wire_symbol}&orderId={order_id}");
        let qs = self.signed_query(&params)?;
        let url = format!("{}/api/v3/order?{qs}", self.base_url);
        self.send(self.client.delete(&url), "DELETE /api/v3/order")
            .await
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
pub fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
