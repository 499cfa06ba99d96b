// =============================================================================
// Exchange Adapter — mode-aware typed order surface with hard safety gates
// =============================================================================
//
// Every trade-path call re-checks, in order: kill-switch, mode (DEMO never
// places an order), live confirmation, symbol whitelist, per-trade quote cap.
// A violation is a `SafetyBlocked` error the controller can classify as a
// non-retryable reject.
//
// Precision boundary: every amount and price leaving this module is floored
// onto the symbol's lot/tick grid and rendered as a string at the grid's own
// precision (see `filters`). Raw float formatting never reaches the wire.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{wire_symbol, AppConfig, Mode};
use crate::kill_switch::KillSwitch;

use super::client::{parse_str_f64, RestClient};
use super::filters::{floor_to_step, SymbolFilters};

// =============================================================================
// SafetyBlocked
// =============================================================================

/// A trade call refused by a safety gate. Non-retryable for the signal that
/// triggered it.
#[derive(Debug, Clone)]
pub struct SafetyBlocked(pub String);

impl std::fmt::Display for SafetyBlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trading blocked: {}", self.0)
    }
}

impl std::error::Error for SafetyBlocked {}

/// Downcast helper: the controller uses this to tell a safety reject from a
/// transient exchange error.
pub fn safety_blocked_reason(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<SafetyBlocked>().map(|b| b.0.as_str())
}

// =============================================================================
// Typed responses
// =============================================================================

/// Normalised view of one exchange order.
#[derive(Debug, Clone, Default)]
pub struct OrderInfo {
    pub id: String,
    pub status: String,
    pub order_type: String,
    /// Average fill price; zero when the exchange did not report one.
    pub average: f64,
    /// Limit price; zero for market orders.
    pub price: f64,
    /// Executed base quantity.
    pub filled: f64,
}

impl OrderInfo {
    /// Parse a Binance-family order payload. Field values arrive as strings
    /// or numbers depending on the endpoint; both are accepted.
    pub fn from_value(raw: &Value) -> Self {
        let id = json_id(raw.get("orderId").unwrap_or(&Value::Null))
            .or_else(|| json_id(raw.get("id").unwrap_or(&Value::Null)))
            .unwrap_or_default();

        let status = raw["status"].as_str().unwrap_or("").to_string();
        let order_type = raw["type"].as_str().unwrap_or("").to_string();

        let price = parse_str_f64(&raw["price"]).unwrap_or(0.0);
        let filled = parse_str_f64(&raw["executedQty"])
            .or_else(|_| parse_str_f64(&raw["filled"]))
            .unwrap_or(0.0);

        // Prefer an explicit average; derive one from the quote turnover
        // otherwise (market fills report cummulativeQuoteQty).
        let average = parse_str_f64(&raw["average"]).unwrap_or(0.0);
        let average = if average > 0.0 {
            average
        } else {
            let quote = parse_str_f64(&raw["cummulativeQuoteQty"]).unwrap_or(0.0);
            if quote > 0.0 && filled > 0.0 {
                quote / filled
            } else {
                0.0
            }
        };

        Self {
            id,
            status,
            order_type,
            average,
            price,
            filled,
        }
    }

    /// Best known fill price: average, falling back to the limit price.
    pub fn fill_price(&self) -> f64 {
        if self.average > 0.0 {
            self.average
        } else {
            self.price
        }
    }
}

/// Raw OCO order-list response plus id extraction.
#[derive(Debug, Clone)]
pub struct OcoOrder {
    pub raw: Value,
}

/// The three ids that make an OCO link persistable.
#[derive(Debug, Clone, Default)]
pub struct OcoIds {
    pub list_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
}

impl OcoIds {
    /// Protection invariant: list id present, both child ids present and
    /// distinct.
    pub fn valid(&self) -> bool {
        match (&self.list_order_id, &self.tp_order_id, &self.sl_order_id) {
            (Some(list), Some(tp), Some(sl)) => {
                !list.is_empty() && !tp.is_empty() && !sl.is_empty() && tp != sl
            }
            _ => false,
        }
    }
}

impl OcoOrder {
    /// Extract the list id and child order ids.
    ///
    /// Primary source is `orderReports[]` (a type containing STOP is the SL
    /// leg, anything else the TP leg); when reports are absent or incomplete
    /// the bare `orders[]` array is used positionally as a fallback.
    pub fn extract_ids(&self) -> OcoIds {
        let mut tp: Option<String> = None;
        let mut sl: Option<String> = None;

        if let Some(reports) = self.raw["orderReports"].as_array() {
            for rep in reports {
                let Some(oid) = json_id(rep.get("orderId").unwrap_or(&Value::Null))
                    .or_else(|| json_id(rep.get("order_id").unwrap_or(&Value::Null)))
                else {
                    continue;
                };

                let typ = rep["type"]
                    .as_str()
                    .or_else(|| rep["orderType"].as_str())
                    .unwrap_or("")
                    .to_uppercase();

                if typ.contains("STOP") {
                    sl.get_or_insert(oid);
                } else {
                    tp.get_or_insert(oid);
                }
            }
        }

        if tp.is_none() || sl.is_none() {
            if let Some(orders) = self.raw["orders"].as_array() {
                let mut uniq: Vec<String> = Vec::new();
                for o in orders {
                    if let Some(oid) = json_id(o.get("orderId").unwrap_or(&Value::Null)) {
                        if !uniq.contains(&oid) {
                            uniq.push(oid);
                        }
                    }
                }
                if uniq.len() >= 2 {
                    tp = tp.or_else(|| Some(uniq[0].clone()));
                    sl = sl.or_else(|| Some(uniq[1].clone()));
                }
            }
        }

        let list_order_id = json_id(self.raw.get("listOrderId").unwrap_or(&Value::Null))
            .or_else(|| json_id(self.raw.get("orderListId").unwrap_or(&Value::Null)));

        OcoIds {
            list_order_id,
            tp_order_id: tp,
            sl_order_id: sl,
        }
    }
}

/// Order/list ids arrive as numbers or strings depending on endpoint version.
fn json_id(val: &Value) -> Option<String> {
    if let Some(n) = val.as_u64() {
        return Some(n.to_string());
    }
    if let Some(n) = val.as_i64() {
        return Some(n.to_string());
    }
    val.as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Render a quote amount for `quoteOrderQty`: fixed 8 decimals, trailing
/// zeros trimmed.
fn format_quote(value: f64) -> String {
    let s = format!("{value:.8}");
    let s = s.trim_end_matches('0');
    s.trim_end_matches('.').to_string()
}

// =============================================================================
// ExchangeApi trait
// =============================================================================

/// The order surface the controller and reconciler are written against. The
/// production implementation is [`ExchangeAdapter`]; tests drive the pipeline
/// with a stub.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn ping(&self) -> Result<()>;
    /// Fetch and cache the symbol's exchange filters.
    async fn sync_filters(&self, symbol: &str) -> Result<SymbolFilters>;

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64>;
    async fn fetch_balance_free(&self, asset: &str) -> Result<f64>;
    async fn fetch_recent_closes(&self, symbol: &str, interval: &str, limit: u32)
        -> Result<Vec<f64>>;

    async fn fetch_order(&self, order_id: &str, symbol: &str) -> Result<OrderInfo>;
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()>;

    async fn place_market_buy_by_quote(&self, symbol: &str, quote_amount: f64)
        -> Result<OrderInfo>;
    async fn place_market_sell(&self, symbol: &str, base_amount: f64) -> Result<OrderInfo>;
    async fn place_limit_sell(&self, symbol: &str, base_amount: f64, price: f64)
        -> Result<OrderInfo>;
    async fn place_stop_loss_limit_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<OrderInfo>;
    async fn place_oco_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        tp_price: f64,
        sl_stop_price: f64,
        sl_limit_price: f64,
    ) -> Result<OcoOrder>;

    async fn get_min_notional(&self, symbol: &str) -> Result<f64>;
    async fn get_lot_step_size(&self, symbol: &str) -> Result<f64>;
    async fn get_price_tick_size(&self, symbol: &str) -> Result<f64>;

    /// Floor a base amount onto the symbol's lot grid.
    async fn floor_amount(&self, symbol: &str, amount: f64) -> Result<f64>;
    /// Floor a price onto the symbol's tick grid.
    async fn floor_price(&self, symbol: &str, price: f64) -> Result<f64>;
}

// =============================================================================
// ExchangeAdapter
// =============================================================================

/// Production adapter over the signed REST client.
pub struct ExchangeAdapter {
    config: AppConfig,
    kill_switch: KillSwitch,
    client: RestClient,
    filters: RwLock<HashMap<String, SymbolFilters>>,
}

impl ExchangeAdapter {
    pub fn new(config: AppConfig, kill_switch: KillSwitch) -> Result<Self> {
        // The client is constructed in every mode: public market data (ticker,
        // klines) is reachable without keys, and DEMO uses it for pricing
        // while the signed order surface stays gated off.
        let client = RestClient::new(&config.api_key, &config.api_secret, config.rest_base())?;

        Ok(Self {
            config,
            kill_switch,
            client,
            filters: RwLock::new(HashMap::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Safety gates
    // -------------------------------------------------------------------------

    /// Gate every order-placing call. Checked immediately before the wire.
    async fn guard_order(&self, symbol: &str, quote_amount: Option<f64>) -> Result<()> {
        if self.kill_switch.is_active().await {
            return Err(SafetyBlocked("KILL_SWITCH_ACTIVE".into()).into());
        }
        if self.config.mode == Mode::Demo {
            return Err(SafetyBlocked("DEMO_MODE_ORDER_CALL".into()).into());
        }
        if self.config.mode == Mode::Live && !self.config.live_confirmation {
            return Err(SafetyBlocked("LIVE_CONFIRMATION_OFF".into()).into());
        }
        if !self.config.symbol_whitelisted(symbol) {
            return Err(SafetyBlocked(format!("SYMBOL_NOT_WHITELISTED {symbol}")).into());
        }
        if let Some(quote) = quote_amount {
            if quote > self.config.max_quote_per_trade {
                return Err(SafetyBlocked(format!(
                    "QUOTE_CAP_EXCEEDED {quote:.8} > {:.8}",
                    self.config.max_quote_per_trade
                ))
                .into());
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Filters cache
    // -------------------------------------------------------------------------

    async fn ensure_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let key = wire_symbol(symbol);
        if let Some(f) = self.filters.read().get(&key) {
            return Ok(f.clone());
        }

        let info = self
            .client
            .exchange_info(&key)
            .await
            .with_context(|| format!("failed to fetch exchange filters for {symbol}"))?;
        let parsed = SymbolFilters::parse(&info)
            .with_context(|| format!("symbol {symbol} is not tradable"))?;

        self.filters.write().insert(key, parsed.clone());
        debug!(symbol, ?parsed, "exchange filters cached");
        Ok(parsed)
    }

    /// Grid-floored amount with its wire string.
    async fn floored_amount(&self, symbol: &str, amount: f64) -> Result<(f64, String)> {
        let filters = self.ensure_filters(symbol).await?;
        let floored = floor_to_step(amount, &filters.lot_step)?;
        Ok((floored.value, floored.text))
    }

    /// Grid-floored price with its wire string.
    async fn floored_price(&self, symbol: &str, price: f64) -> Result<(f64, String)> {
        let filters = self.ensure_filters(symbol).await?;
        let floored = floor_to_step(price, &filters.price_tick)?;
        Ok((floored.value, floored.text))
    }
}

#[async_trait]
impl ExchangeApi for ExchangeAdapter {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }

    async fn sync_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        // Forced refresh: drop any cached entry first.
        self.filters.write().remove(&wire_symbol(symbol));
        self.ensure_filters(symbol).await
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64> {
        self.client.ticker_price(&wire_symbol(symbol)).await
    }

    async fn fetch_balance_free(&self, asset: &str) -> Result<f64> {
        self.client.balance_free(asset).await
    }

    async fn fetch_recent_closes(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<f64>> {
        self.client
            .kline_closes(&wire_symbol(symbol), interval, limit)
            .await
    }

    async fn fetch_order(&self, order_id: &str, symbol: &str) -> Result<OrderInfo> {
        let raw = self.client.get_order(&wire_symbol(symbol), order_id).await?;
        Ok(OrderInfo::from_value(&raw))
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()> {
        // Canceling is a protective action; it is allowed with the kill-switch
        // on, but never in DEMO (no real order can exist there).
        if self.config.mode == Mode::Demo {
            return Err(SafetyBlocked("DEMO_MODE_ORDER_CALL".into()).into());
        }
        self.client
            .cancel_order(&wire_symbol(symbol), order_id)
            .await?;
        info!(order_id, symbol, "order canceled");
        Ok(())
    }

    async fn place_market_buy_by_quote(
        &self,
        symbol: &str,
        quote_amount: f64,
    ) -> Result<OrderInfo> {
        self.guard_order(symbol, Some(quote_amount)).await?;

        let params = format!(
            "symbol={}&side=BUY&type=MARKET&quoteOrderQty={}",
            wire_symbol(symbol),
            format_quote(quote_amount)
        );

        debug!(symbol, quote_amount, "placing market buy by quote");
        let raw = self.client.post_order(&params).await?;
        let order = OrderInfo::from_value(&raw);
        info!(symbol, order_id = %order.id, avg = order.average, "market buy placed");
        Ok(order)
    }

    async fn place_market_sell(&self, symbol: &str, base_amount: f64) -> Result<OrderInfo> {
        self.guard_order(symbol, None).await?;

        let (amount, amount_text) = self.floored_amount(symbol, base_amount).await?;
        if amount <= 0.0 {
            anyhow::bail!("market sell amount floors to zero for {symbol}");
        }

        let params = format!(
            "symbol={}&side=SELL&type=MARKET&quantity={amount_text}",
            wire_symbol(symbol)
        );

        debug!(symbol, amount = %amount_text, "placing market sell");
        let raw = self.client.post_order(&params).await?;
        let order = OrderInfo::from_value(&raw);
        info!(symbol, order_id = %order.id, avg = order.average, "market sell placed");
        Ok(order)
    }

    async fn place_limit_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        price: f64,
    ) -> Result<OrderInfo> {
        self.guard_order(symbol, None).await?;

        let (amount, amount_text) = self.floored_amount(symbol, base_amount).await?;
        if amount <= 0.0 {
            anyhow::bail!("limit sell amount floors to zero for {symbol}");
        }
        let (_, price_text) = self.floored_price(symbol, price).await?;

        let params = format!(
            "symbol={}&side=SELL&type=LIMIT&timeInForce=GTC&quantity={amount_text}&price={price_text}",
            wire_symbol(symbol)
        );

        debug!(symbol, amount = %amount_text, price = %price_text, "placing limit sell");
        let raw = self.client.post_order(&params).await?;
        Ok(OrderInfo::from_value(&raw))
    }

    async fn place_stop_loss_limit_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<OrderInfo> {
        self.guard_order(symbol, None).await?;

        let (amount, amount_text) = self.floored_amount(symbol, base_amount).await?;
        if amount <= 0.0 {
            anyhow::bail!("stop-loss-limit sell amount floors to zero for {symbol}");
        }
        let (_, stop_text) = self.floored_price(symbol, stop_price).await?;
        let (_, limit_text) = self.floored_price(symbol, limit_price).await?;

        let params = format!(
            "symbol={}&side=SELL&type=STOP_LOSS_LIMIT&timeInForce=GTC&quantity={amount_text}&stopPrice={stop_text}&price={limit_text}",
            wire_symbol(symbol)
        );

        debug!(
            symbol,
            amount = %amount_text,
            stop = %stop_text,
            limit = %limit_text,
            "placing stop-loss-limit sell"
        );
        let raw = self.client.post_order(&params).await?;
        Ok(OrderInfo::from_value(&raw))
    }

    async fn place_oco_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        tp_price: f64,
        sl_stop_price: f64,
        sl_limit_price: f64,
    ) -> Result<OcoOrder> {
        self.guard_order(symbol, None).await?;

        let (amount, amount_text) = self.floored_amount(symbol, base_amount).await?;
        if amount <= 0.0 {
            anyhow::bail!("oco sell amount floors to zero for {symbol}");
        }
        let (_, tp_text) = self.floored_price(symbol, tp_price).await?;
        let (_, stop_text) = self.floored_price(symbol, sl_stop_price).await?;
        let (_, limit_text) = self.floored_price(symbol, sl_limit_price).await?;

        let params = format!(
            "symbol={}&side=SELL&quantity={amount_text}&price={tp_text}&stopPrice={stop_text}&stopLimitPrice={limit_text}&stopLimitTimeInForce=GTC",
            wire_symbol(symbol)
        );

        debug!(
            symbol,
            amount = %amount_text,
            tp = %tp_text,
            sl_stop = %stop_text,
            sl_limit = %limit_text,
            "placing oco sell"
        );
        let raw = self.client.post_oco(&params).await?;
        info!(symbol, "oco sell placed");
        Ok(OcoOrder { raw })
    }

    async fn get_min_notional(&self, symbol: &str) -> Result<f64> {
        Ok(self.ensure_filters(symbol).await?.min_notional)
    }

    async fn get_lot_step_size(&self, symbol: &str) -> Result<f64> {
        Ok(self.ensure_filters(symbol).await?.lot_step_size())
    }

    async fn get_price_tick_size(&self, symbol: &str) -> Result<f64> {
        Ok(self.ensure_filters(symbol).await?.price_tick_size())
    }

    async fn floor_amount(&self, symbol: &str, amount: f64) -> Result<f64> {
        Ok(self.floored_amount(symbol, amount).await?.0)
    }

    async fn floor_price(&self, symbol: &str, price: f64) -> Result<f64> {
        Ok(self.floored_price(symbol, price).await?.0)
    }
}

impl std::fmt::Debug for ExchangeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeAdapter")
            .field("mode", &self.config.mode)
            .field("filters_cached", &self.filters.read().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;

    #[test]
    fn order_info_parses_string_and_number_fields() {
        let raw = json!({
            "orderId": 123456,
            "status": "FILLED",
            "type": "MARKET",
            "price": "0.00000000",
            "executedQty": "0.00015000",
            "cummulativeQuoteQty": "15.00000000"
        });

        let order = OrderInfo::from_value(&raw);
        assert_eq!(order.id, "123456");
        assert_eq!(order.status, "FILLED");
        assert!((order.filled - 0.00015).abs() < 1e-12);
        // average derived from quote turnover: 15 / 0.00015 = 100000.
        assert!((order.average - 100_000.0).abs() < 1e-6);
        assert!((order.fill_price() - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn order_info_prefers_explicit_average() {
        let raw = json!({
            "id": "77",
            "status": "closed",
            "average": "101300.5",
            "price": "101000.0",
            "filled": "0.001"
        });
        let order = OrderInfo::from_value(&raw);
        assert_eq!(order.id, "77");
        assert!((order.average - 101_300.5).abs() < 1e-9);
        assert!((order.fill_price() - 101_300.5).abs() < 1e-9);
    }

    #[test]
    fn oco_ids_extracted_from_order_reports() {
        let oco = OcoOrder {
            raw: json!({
                "listOrderId": 555,
                "orderReports": [
                    { "orderId": 1001, "type": "STOP_LOSS_LIMIT" },
                    { "orderId": 1002, "type": "LIMIT_MAKER" }
                ]
            }),
        };

        let ids = oco.extract_ids();
        assert_eq!(ids.list_order_id.as_deref(), Some("555"));
        assert_eq!(ids.sl_order_id.as_deref(), Some("1001"));
        assert_eq!(ids.tp_order_id.as_deref(), Some("1002"));
        assert!(ids.valid());
    }

    #[test]
    fn oco_ids_fall_back_to_orders_array() {
        let oco = OcoOrder {
            raw: json!({
                "orderListId": "L9",
                "orderReports": [],
                "orders": [
                    { "orderId": 21 },
                    { "orderId": 22 },
                    { "orderId": 21 }
                ]
            }),
        };

        let ids = oco.extract_ids();
        assert_eq!(ids.list_order_id.as_deref(), Some("L9"));
        assert_eq!(ids.tp_order_id.as_deref(), Some("21"));
        assert_eq!(ids.sl_order_id.as_deref(), Some("22"));
        assert!(ids.valid());
    }

    #[test]
    fn duplicate_child_ids_are_invalid() {
        let oco = OcoOrder {
            raw: json!({
                "listOrderId": "L2",
                "orderReports": [
                    { "orderId": "X", "type": "STOP_LOSS_LIMIT" },
                    { "orderId": "X", "type": "LIMIT_MAKER" }
                ]
            }),
        };

        let ids = oco.extract_ids();
        // Both legs resolve to "X": the fallback cannot rescue this either.
        assert!(!ids.valid());
    }

    #[test]
    fn empty_reports_and_orders_are_invalid() {
        let oco = OcoOrder {
            raw: json!({ "listOrderId": "L3", "orderReports": [], "orders": [] }),
        };
        assert!(!oco.extract_ids().valid());
    }

    #[test]
    fn quote_formatting_trims_trailing_zeros() {
        assert_eq!(format_quote(15.0), "15");
        assert_eq!(format_quote(15.5), "15.5");
        assert_eq!(format_quote(0.1), "0.1");
        assert_eq!(format_quote(12.345678), "12.345678");
    }

    async fn testnet_adapter(mode: Mode) -> ExchangeAdapter {
        let store = Store::memory().await.unwrap();
        let mut config = crate::config::test_config();
        config.mode = mode;
        let kill_switch = KillSwitch::new(false, store);
        ExchangeAdapter::new(config, kill_switch).unwrap()
    }

    #[tokio::test]
    async fn demo_mode_blocks_order_calls_before_the_wire() {
        let adapter = testnet_adapter(Mode::Demo).await;
        let err = adapter
            .place_market_buy_by_quote("BTC/USDT", 15.0)
            .await
            .unwrap_err();
        assert_eq!(safety_blocked_reason(&err), Some("DEMO_MODE_ORDER_CALL"));
    }

    #[tokio::test]
    async fn live_without_confirmation_is_blocked() {
        let adapter = testnet_adapter(Mode::Live).await;
        let err = adapter
            .place_market_buy_by_quote("BTC/USDT", 15.0)
            .await
            .unwrap_err();
        assert_eq!(safety_blocked_reason(&err), Some("LIVE_CONFIRMATION_OFF"));
    }

    #[tokio::test]
    async fn whitelist_and_cap_are_enforced() {
        let adapter = testnet_adapter(Mode::Testnet).await;

        let err = adapter
            .place_market_buy_by_quote("DOGE/USDT", 15.0)
            .await
            .unwrap_err();
        assert!(safety_blocked_reason(&err)
            .unwrap()
            .starts_with("SYMBOL_NOT_WHITELISTED"));

        let err = adapter
            .place_market_buy_by_quote("BTC/USDT", 1_000_000.0)
            .await
            .unwrap_err();
        assert!(safety_blocked_reason(&err)
            .unwrap()
            .starts_with("QUOTE_CAP_EXCEEDED"));
    }

    #[tokio::test]
    async fn kill_switch_blocks_every_order_call() {
        let store = Store::memory().await.unwrap();
        store
            .update_system_state(None, None, Some(true))
            .await
            .unwrap();

        let mut config = crate::config::test_config();
        config.mode = Mode::Testnet;
        let adapter = ExchangeAdapter::new(config, KillSwitch::new(false, store)).unwrap();

        let err = adapter
            .place_oco_sell("BTC/USDT", 0.001, 1.0, 0.9, 0.89)
            .await
            .unwrap_err();
        assert_eq!(safety_blocked_reason(&err), Some("KILL_SWITCH_ACTIVE"));
    }
}
