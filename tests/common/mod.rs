// Shared fixtures for the end-to-end scenarios: a scriptable stub exchange
// and context builders around an in-memory store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use meridian_executor::config::{AppConfig, Mode};
use meridian_executor::context::AppContext;
use meridian_executor::exchange::filters::floor_to_step;
use meridian_executor::exchange::{ExchangeApi, OcoOrder, OrderInfo, SymbolFilters};
use meridian_executor::outbox::Outbox;
use meridian_executor::signal::{EntrySpec, ExecutionSpec, Signal, Verdict};
use meridian_executor::store::Store;

// ---------------------------------------------------------------------------
// Config / context builders
// ---------------------------------------------------------------------------

pub fn base_config(mode: Mode) -> AppConfig {
    AppConfig {
        mode,
        env_kill_switch: false,
        live_confirmation: true,
        db_path: PathBuf::from(":memory:"),
        outbox_path: temp_path("outbox"),
        symbol_whitelist: vec!["BTC/USDT".into()],
        max_quote_per_trade: 50.0,
        tp_pct: 1.30,
        sl_pct: 0.70,
        sl_limit_gap_pct: 0.15,
        sell_buffer: 0.999,
        sell_retry_buffer: 0.998,
        estimated_roundtrip_fee_pct: 0.20,
        estimated_slippage_pct: 0.15,
        min_net_profit_pct: 0.60,
        loop_sleep_seconds: 0.01,
        generator_enabled: false,
        quote_per_trade: 15.0,
        generator_cooldown_seconds: 180,
        virtual_start_balance: 100_000.0,
        api_key: "test-key".into(),
        api_secret: "test-secret".into(),
        rest_base_live: "https://api.binance.invalid".into(),
        rest_base_testnet: "https://testnet.binance.invalid".into(),
    }
}

pub fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("meridian-{tag}-{}.json", uuid::Uuid::new_v4()))
}

/// In-memory store + fresh outbox, with the system state set permissive.
pub async fn trading_context(config: AppConfig) -> AppContext {
    let store = Store::memory().await.unwrap();
    store
        .update_system_state(
            Some(meridian_executor::store::SystemStatus::Active),
            Some(true),
            None,
        )
        .await
        .unwrap();

    let outbox = Outbox::new(config.outbox_path.clone());
    outbox.ensure_exists().unwrap();

    AppContext::new(config, store, outbox)
}

// ---------------------------------------------------------------------------
// Signal builders
// ---------------------------------------------------------------------------

pub fn trade_signal(id: &str, quote_amount: f64) -> Signal {
    Signal {
        signal_id: id.to_string(),
        final_verdict: Verdict::Trade,
        certified_signal: true,
        timestamp_utc: None,
        execution: ExecutionSpec {
            symbol: "BTC/USDT".into(),
            direction: "LONG".into(),
            entry: EntrySpec {
                entry_type: "MARKET".into(),
                price: None,
            },
            position_size: None,
            quote_amount: Some(quote_amount),
        },
        fingerprint: None,
    }
}

pub fn sell_signal(id: &str) -> Signal {
    let mut sig = trade_signal(id, 15.0);
    sig.final_verdict = Verdict::Sell;
    sig.execution.quote_amount = None;
    sig
}

// ---------------------------------------------------------------------------
// Stub exchange
// ---------------------------------------------------------------------------

/// Scriptable exchange double. Responses are configured up front; every order
/// call is recorded for assertions.
pub struct StubExchange {
    pub last_price: Mutex<f64>,
    pub min_notional: Mutex<f64>,
    pub lot_step: String,
    pub price_tick: String,
    pub free_base: Mutex<f64>,

    /// Response to the next market buy; `None` simulates a wire failure.
    pub buy_response: Mutex<Option<OrderInfo>>,
    /// Response to the next market sell; `None` simulates a wire failure.
    pub sell_response: Mutex<Option<OrderInfo>>,
    /// Raw OCO response document; `None` simulates a wire failure.
    pub oco_response: Mutex<Option<Value>>,
    /// Orders visible to `fetch_order`, keyed by order id.
    pub orders: Mutex<HashMap<String, OrderInfo>>,

    // Recorded calls.
    pub buys: Mutex<Vec<(String, f64)>>,
    pub sells: Mutex<Vec<(String, f64)>>,
    pub ocos: Mutex<Vec<OcoCall>>,
    pub canceled: Mutex<Vec<String>>,

    /// When set, the persisted kill-switch is flipped on during the
    /// min-notional lookup — after the gate checks, before the last-gate
    /// re-check (scenario S3).
    pub flip_kill_on_min_notional: Mutex<Option<Store>>,
}

#[derive(Debug, Clone)]
pub struct OcoCall {
    pub symbol: String,
    pub amount: f64,
    pub tp: f64,
    pub sl_stop: f64,
    pub sl_limit: f64,
}

impl StubExchange {
    /// The S1 fixture: BTC at 100 000, min notional 10, 1e-5 lot, 0.01 tick,
    /// 0.00015 free base, buy filling at average 100 000, a well-formed OCO
    /// response (list L1, TP T1, SL S1).
    pub fn happy() -> Self {
        Self {
            last_price: Mutex::new(100_000.0),
            min_notional: Mutex::new(10.0),
            lot_step: "0.00001".into(),
            price_tick: "0.01".into(),
            free_base: Mutex::new(0.00015),
            buy_response: Mutex::new(Some(OrderInfo {
                id: "B1".into(),
                status: "FILLED".into(),
                order_type: "MARKET".into(),
                average: 100_000.0,
                price: 0.0,
                filled: 0.00015,
            })),
            sell_response: Mutex::new(Some(OrderInfo {
                id: "M1".into(),
                status: "FILLED".into(),
                order_type: "MARKET".into(),
                average: 100_500.0,
                price: 0.0,
                filled: 0.00014,
            })),
            oco_response: Mutex::new(Some(serde_json::json!({
                "listOrderId": "L1",
                "orderReports": [
                    { "orderId": "T1", "type": "LIMIT_MAKER" },
                    { "orderId": "S1", "type": "STOP_LOSS_LIMIT" }
                ]
            }))),
            orders: Mutex::new(HashMap::new()),
            buys: Mutex::new(Vec::new()),
            sells: Mutex::new(Vec::new()),
            ocos: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            flip_kill_on_min_notional: Mutex::new(None),
        }
    }

    pub fn set_order(&self, id: &str, status: &str, average: f64) {
        self.orders.lock().insert(
            id.to_string(),
            OrderInfo {
                id: id.to_string(),
                status: status.to_string(),
                order_type: String::new(),
                average,
                price: 0.0,
                filled: 0.0,
            },
        );
    }
}

#[async_trait]
impl ExchangeApi for StubExchange {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn sync_filters(&self, _symbol: &str) -> Result<SymbolFilters> {
        Ok(SymbolFilters {
            min_notional: *self.min_notional.lock(),
            lot_step: self.lot_step.clone(),
            price_tick: self.price_tick.clone(),
        })
    }

    async fn fetch_last_price(&self, _symbol: &str) -> Result<f64> {
        Ok(*self.last_price.lock())
    }

    async fn fetch_balance_free(&self, _asset: &str) -> Result<f64> {
        Ok(*self.free_base.lock())
    }

    async fn fetch_recent_closes(
        &self,
        _symbol: &str,
        _interval: &str,
        _limit: u32,
    ) -> Result<Vec<f64>> {
        Ok(Vec::new())
    }

    async fn fetch_order(&self, order_id: &str, _symbol: &str) -> Result<OrderInfo> {
        self.orders
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("order {order_id} not found"))
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        self.canceled.lock().push(order_id.to_string());
        Ok(())
    }

    async fn place_market_buy_by_quote(
        &self,
        symbol: &str,
        quote_amount: f64,
    ) -> Result<OrderInfo> {
        self.buys.lock().push((symbol.to_string(), quote_amount));
        self.buy_response
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("stub buy failure"))
    }

    async fn place_market_sell(&self, symbol: &str, base_amount: f64) -> Result<OrderInfo> {
        self.sells.lock().push((symbol.to_string(), base_amount));
        self.sell_response
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("stub sell failure"))
    }

    async fn place_limit_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        _price: f64,
    ) -> Result<OrderInfo> {
        self.sells.lock().push((symbol.to_string(), base_amount));
        self.sell_response
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("stub limit sell failure"))
    }

    async fn place_stop_loss_limit_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        _stop_price: f64,
        _limit_price: f64,
    ) -> Result<OrderInfo> {
        self.sells.lock().push((symbol.to_string(), base_amount));
        self.sell_response
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("stub stop-limit sell failure"))
    }

    async fn place_oco_sell(
        &self,
        symbol: &str,
        base_amount: f64,
        tp_price: f64,
        sl_stop_price: f64,
        sl_limit_price: f64,
    ) -> Result<OcoOrder> {
        self.ocos.lock().push(OcoCall {
            symbol: symbol.to_string(),
            amount: base_amount,
            tp: tp_price,
            sl_stop: sl_stop_price,
            sl_limit: sl_limit_price,
        });
        self.oco_response
            .lock()
            .clone()
            .map(|raw| OcoOrder { raw })
            .ok_or_else(|| anyhow!("stub oco failure"))
    }

    async fn get_min_notional(&self, _symbol: &str) -> Result<f64> {
        let flip = self.flip_kill_on_min_notional.lock().take();
        if let Some(store) = flip {
            // Flip the persisted switch mid-flight; the controller must catch
            // it at the last gate before the buy.
            store.update_system_state(None, None, Some(true)).await?;
        }
        Ok(*self.min_notional.lock())
    }

    async fn get_lot_step_size(&self, _symbol: &str) -> Result<f64> {
        Ok(self.lot_step.parse().unwrap_or(0.0))
    }

    async fn get_price_tick_size(&self, _symbol: &str) -> Result<f64> {
        Ok(self.price_tick.parse().unwrap_or(0.0))
    }

    async fn floor_amount(&self, _symbol: &str, amount: f64) -> Result<f64> {
        Ok(floor_to_step(amount, &self.lot_step)?.value)
    }

    async fn floor_price(&self, _symbol: &str, price: f64) -> Result<f64> {
        Ok(floor_to_step(price, &self.price_tick)?.value)
    }
}

/// Count audit rows of one type.
pub async fn audit_count(ctx: &AppContext, event_type: &str) -> i64 {
    ctx.store.count_audit_events(event_type).await.unwrap()
}

pub fn arc(stub: StubExchange) -> Arc<StubExchange> {
    Arc::new(stub)
}
