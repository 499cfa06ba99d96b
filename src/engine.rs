// =============================================================================
// Execution Controller — the gate -> size -> entry -> protect state machine
// =============================================================================
//
// Per signal: RECEIVED -> GATED -> SIZED -> EDGE-OK -> ENTRY-PLACED ->
// OCO-ARMED -> PERSISTED -> DONE, with terminal branches REJECTED, BLOCKED,
// DEDUPED, ERROR, and FAILSAFE.
//
// Ordering guarantees:
//   * the idempotency check strictly precedes any wire call;
//   * the kill-switch is re-evaluated immediately before each order-placing
//     wire call;
//   * "mark executed" follows successful entry placement but precedes OCO
//     arming — once the entry is filled, retrying is unsafe.
//
// Both ACTIVE and RUNNING system statuses permit trading.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::{base_asset, AppConfig, Mode};
use crate::context::AppContext;
use crate::exchange::adapter::safety_blocked_reason;
use crate::exchange::ExchangeApi;
use crate::kill_switch::KillSwitch;
use crate::signal::{self, Signal, Verdict};
use crate::store::{Store, TradeOutcome};
use crate::wallet::VirtualWallet;

// ---------------------------------------------------------------------------
// Outcome type
// ---------------------------------------------------------------------------

/// Terminal outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The signal ran to completion (trade armed, sell done, or hold).
    Done,
    /// Duplicate signal id; nothing was done.
    Deduped,
    /// A gate refused the signal; it was NOT marked executed and may be
    /// replayed once the gate clears.
    Blocked(String),
    /// A terminal reject; the signal was marked executed and will not respawn.
    Rejected(String),
    /// Protection invariants could not be upheld; the kill-switch is now ON.
    Failsafe(String),
    /// A transient error; the signal was not marked executed.
    Error(String),
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "Done"),
            Self::Deduped => write!(f, "Deduped"),
            Self::Blocked(reason) => write!(f, "Blocked({reason})"),
            Self::Rejected(reason) => write!(f, "Rejected({reason})"),
            Self::Failsafe(reason) => write!(f, "Failsafe({reason})"),
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives one signal at a time through the execution pipeline. The only
/// writer of `oco_links` inserts and of `executed_signals`.
pub struct ExecutionController {
    config: AppConfig,
    store: Store,
    exchange: Arc<dyn ExchangeApi>,
    kill_switch: KillSwitch,
    wallet: Arc<VirtualWallet>,
}

impl ExecutionController {
    pub fn new(ctx: &AppContext, exchange: Arc<dyn ExchangeApi>) -> Self {
        Self {
            config: ctx.config.clone(),
            store: ctx.store.clone(),
            exchange,
            kill_switch: ctx.kill_switch.clone(),
            wallet: ctx.wallet.clone(),
        }
    }

    /// Append one audit row. A store failure here is logged and swallowed so
    /// that gate decisions still resolve; the tracing output remains.
    async fn audit(&self, event_type: &str, message: &str) {
        if let Err(e) = self.store.log_event(event_type, message).await {
            error!(event_type, error = %e, "audit append failed");
        }
    }

    async fn mark_executed(
        &self,
        signal: &Signal,
        action: &str,
    ) -> Result<()> {
        self.store
            .mark_signal_id_executed(
                &signal.signal_id,
                signal.fingerprint.as_deref(),
                action,
                &signal.symbol(),
            )
            .await
    }

    // -------------------------------------------------------------------------
    // Entry point
    // -------------------------------------------------------------------------

    /// Execute one signal to a terminal outcome. Never panics; every branch
    /// leaves an audit row.
    pub async fn execute_signal(&self, sig: &Signal) -> ExecutionOutcome {
        let id = sig.signal_id.as_str();
        info!(
            signal_id = id,
            verdict = %sig.final_verdict,
            mode = %self.config.mode,
            "execution entered"
        );

        // --- Gate (a): idempotency. A check failure blocks — never trade on
        // an unknown dedupe state.
        match self.store.signal_id_already_executed(id).await {
            Ok(true) => {
                warn!(signal_id = id, "duplicate signal ignored");
                self.audit("EXEC_DEDUPED", &format!("id={id}")).await;
                return ExecutionOutcome::Deduped;
            }
            Ok(false) => {}
            Err(e) => {
                error!(signal_id = id, error = %e, "idempotency check failed");
                self.audit("EXEC_BLOCKED_IDEMPOTENCY_FAIL", &format!("{id} err={e}"))
                    .await;
                return ExecutionOutcome::Blocked("IDEMPOTENCY_CHECK_FAIL".into());
            }
        }

        // --- Gate (b): kill-switch.
        if self.kill_switch.is_active().await {
            warn!(signal_id = id, "blocked by kill-switch");
            self.audit("EXEC_BLOCKED_KILL_SWITCH", id).await;
            return ExecutionOutcome::Blocked("KILL_SWITCH".into());
        }

        // --- Gate (c): system state must be synced and permissive.
        match self.store.get_system_state().await {
            Ok(state) => {
                if !state.startup_sync_ok || !state.status.permits_trading() {
                    warn!(
                        signal_id = id,
                        status = %state.status,
                        sync_ok = state.startup_sync_ok,
                        "blocked by system state"
                    );
                    self.audit(
                        "EXEC_BLOCKED_SYSTEM_STATE",
                        &format!("{id} status={} sync_ok={}", state.status, state.startup_sync_ok),
                    )
                    .await;
                    return ExecutionOutcome::Blocked("SYSTEM_STATE".into());
                }
            }
            Err(e) => {
                error!(signal_id = id, error = %e, "system state read failed");
                self.audit("EXEC_BLOCKED_SYSTEM_STATE", &format!("{id} err={e}"))
                    .await;
                return ExecutionOutcome::Blocked("SYSTEM_STATE_READ_FAIL".into());
            }
        }

        // --- Gate (d): LIVE requires the explicit confirmation flag.
        if self.config.mode == Mode::Live && !self.config.live_confirmation {
            warn!(signal_id = id, "blocked: LIVE_CONFIRMATION off");
            self.audit("EXEC_BLOCKED_LIVE_CONFIRMATION", id).await;
            return ExecutionOutcome::Blocked("LIVE_CONFIRMATION".into());
        }

        // --- Gate (e): certification.
        if !sig.certified_signal {
            self.audit("REJECT_NOT_CERTIFIED", id).await;
            return ExecutionOutcome::Rejected("NOT_CERTIFIED".into());
        }

        // --- Payload shape (defense in depth; the outbox validated on append).
        if let Err(e) = signal::validate(sig) {
            warn!(signal_id = id, error = %e, "bad signal payload");
            self.audit("REJECT_BAD_PAYLOAD", &format!("{id} err={e}")).await;
            return ExecutionOutcome::Rejected("BAD_PAYLOAD".into());
        }

        match sig.final_verdict {
            Verdict::Hold => {
                info!(signal_id = id, "HOLD — no action");
                self.audit("EXEC_HOLD", id).await;
                ExecutionOutcome::Done
            }
            Verdict::Sell => self.execute_sell(sig).await,
            Verdict::Trade => {
                if self.config.mode == Mode::Demo {
                    self.execute_trade_demo(sig).await
                } else {
                    match self.execute_trade_live(sig).await {
                        Ok(outcome) => outcome,
                        Err(e) => self.classify_trade_error(sig, e).await,
                    }
                }
            }
        }
    }

    /// Map an error escaping the live-trade path onto an outcome.
    async fn classify_trade_error(
        &self,
        sig: &Signal,
        e: anyhow::Error,
    ) -> ExecutionOutcome {
        let id = sig.signal_id.as_str();

        if let Some(reason) = safety_blocked_reason(&e) {
            // An adapter-level kill-switch hit is a retryable block (nothing
            // was placed); the other safety gates are terminal rejects.
            if reason == "KILL_SWITCH_ACTIVE" {
                error!(signal_id = id, "kill-switch hit at the adapter gate");
                self.audit("EXEC_BLOCKED_KILL_SWITCH_LAST_GATE", &format!("{id} BUY_BLOCKED"))
                    .await;
                return ExecutionOutcome::Blocked("KILL_SWITCH_LAST_GATE".into());
            }

            let reason = reason.to_string();
            warn!(signal_id = id, reason = %reason, "live trading blocked by adapter gate");
            self.audit("EXEC_REJECT_LIVE_BLOCKED", &format!("{id} reason={reason}"))
                .await;
            if let Err(mark_err) = self.mark_executed(sig, "REJECT_LIVE_BLOCKED").await {
                error!(signal_id = id, error = %mark_err, "failed to mark rejected signal");
            }
            return ExecutionOutcome::Rejected(reason);
        }

        error!(signal_id = id, error = %e, "live execution error");
        self.audit("EXEC_LIVE_ERROR", &format!("{id} err={e}")).await;
        ExecutionOutcome::Error(format!("{e}"))
    }

    // -------------------------------------------------------------------------
    // DEMO trade path
    // -------------------------------------------------------------------------

    async fn execute_trade_demo(&self, sig: &Signal) -> ExecutionOutcome {
        let id = sig.signal_id.as_str();
        let symbol = sig.symbol();

        let last = match self.exchange.fetch_last_price(&symbol).await {
            Ok(p) if p > 0.0 => p,
            Ok(_) | Err(_) => {
                self.audit("EXEC_DEMO_ERROR", &format!("{id} no last price for {symbol}"))
                    .await;
                return ExecutionOutcome::Error("DEMO_NO_PRICE".into());
            }
        };

        let base_size = match sig.execution.position_size {
            Some(p) => p,
            None => sig.execution.quote_amount.unwrap_or(0.0) / last,
        };

        match self
            .wallet
            .simulate_market_entry(&symbol, "LONG", base_size, last)
        {
            Ok(_) => {
                info!(signal_id = id, symbol = %symbol, size = base_size, price = last, "demo entry simulated");
                self.audit(
                    "TRADE_EXECUTED",
                    &format!("{id} DEMO {symbol} size={base_size} price={last}"),
                )
                .await;
                if let Err(e) = self.mark_executed(sig, "TRADE_DEMO").await {
                    error!(signal_id = id, error = %e, "failed to mark demo trade executed");
                    return ExecutionOutcome::Error(format!("{e}"));
                }
                ExecutionOutcome::Done
            }
            Err(e) => {
                self.audit("EXEC_DEMO_ERROR", &format!("{id} err={e}")).await;
                ExecutionOutcome::Error(format!("{e}"))
            }
        }
    }

    // -------------------------------------------------------------------------
    // LIVE/TESTNET trade path
    // -------------------------------------------------------------------------

    /// Execution-side edge gate: TP must cover round-trip costs and still
    /// leave the configured minimum.
    fn net_edge(&self) -> (f64, f64) {
        let cost = self.config.estimated_roundtrip_fee_pct + self.config.estimated_slippage_pct;
        (self.config.tp_pct - cost, cost)
    }

    async fn execute_trade_live(&self, sig: &Signal) -> Result<ExecutionOutcome> {
        let id = sig.signal_id.as_str();
        let symbol = sig.symbol();

        // --- SIZED: quote amount from the signal, or base size at last price.
        let quote_amount = match sig.execution.quote_amount {
            Some(q) => q,
            None => {
                let last = self.exchange.fetch_last_price(&symbol).await?;
                sig.execution.position_size.unwrap_or(0.0) * last
            }
        };

        // --- Min-notional reject (terminal).
        let min_notional = match self.exchange.get_min_notional(&symbol).await {
            Ok(m) => m,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "min-notional unavailable — skipping check");
                0.0
            }
        };
        if min_notional > 0.0 && quote_amount < min_notional {
            let msg = format!(
                "{id} symbol={symbol} quote={quote_amount:.8} < min_notional={min_notional}"
            );
            warn!(signal_id = id, %msg, "rejected: below min notional");
            self.audit("EXEC_REJECT_MIN_NOTIONAL", &msg).await;
            self.mark_executed(sig, "REJECT_MIN_NOTIONAL").await?;
            return Ok(ExecutionOutcome::Rejected("MIN_NOTIONAL".into()));
        }

        // --- Race-condition guard: never buy over an ACTIVE protection link.
        match self.store.has_active_oco_for_symbol(&symbol).await {
            Ok(true) => {
                let msg = format!("{id} symbol={symbol}");
                warn!(signal_id = id, symbol = %symbol, "rejected: active OCO already exists");
                self.audit("EXEC_REJECT_ACTIVE_OCO_RACE", &msg).await;
                self.mark_executed(sig, "REJECT_ACTIVE_OCO_RACE").await?;
                return Ok(ExecutionOutcome::Rejected("ACTIVE_OCO_RACE".into()));
            }
            Ok(false) => {}
            Err(e) => {
                let msg = format!("{id} symbol={symbol} err={e}");
                warn!(signal_id = id, error = %e, "active OCO check failed — blocking");
                self.audit("EXEC_BLOCKED_ACTIVE_OCO_CHECK_FAIL", &msg).await;
                return Ok(ExecutionOutcome::Blocked("ACTIVE_OCO_CHECK_FAIL".into()));
            }
        }

        // --- EDGE-OK: refuse entries whose net expectation is too thin.
        let (net, cost) = self.net_edge();
        if net < self.config.min_net_profit_pct {
            let msg = format!(
                "{id} symbol={symbol} EDGE_TOO_SMALL tp={:.2} cost={cost:.2} net={net:.2} < min_net={:.2}",
                self.config.tp_pct, self.config.min_net_profit_pct
            );
            warn!(signal_id = id, %msg, "rejected by edge gate");
            self.audit("EXEC_REJECT_EDGE_GATE", &msg).await;
            self.mark_executed(sig, "REJECT_EDGE_GATE").await?;
            return Ok(ExecutionOutcome::Rejected("EDGE_TOO_SMALL".into()));
        }

        // --- Kill-switch re-check immediately before the wire call.
        if self.kill_switch.is_active().await {
            error!(signal_id = id, "kill-switch active at last gate — buy blocked");
            self.audit("EXEC_BLOCKED_KILL_SWITCH_LAST_GATE", &format!("{id} BUY_BLOCKED"))
                .await;
            return Ok(ExecutionOutcome::Blocked("KILL_SWITCH_LAST_GATE".into()));
        }

        // --- ENTRY-PLACED.
        let buy = self
            .exchange
            .place_market_buy_by_quote(&symbol, quote_amount)
            .await?;

        let mut buy_avg = buy.fill_price();
        if buy_avg <= 0.0 {
            buy_avg = self.exchange.fetch_last_price(&symbol).await.unwrap_or(0.0);
        }

        info!(
            signal_id = id,
            symbol = %symbol,
            quote = quote_amount,
            avg = buy_avg,
            order_id = %buy.id,
            "live buy filled"
        );
        self.audit(
            "TRADE_EXECUTED",
            &format!(
                "{id} LIVE BUY {symbol} quote={quote_amount} avg={buy_avg} order_id={}",
                buy.id
            ),
        )
        .await;

        // The exchange accepted the entry: the signal is non-retryable from
        // here, even if arming the protection below fails.
        self.mark_executed(sig, "TRADE_LIVE_BUY").await?;

        let qty = if buy.filled > 0.0 {
            buy.filled
        } else if buy_avg > 0.0 {
            quote_amount / buy_avg
        } else {
            0.0
        };
        if let Err(e) = self
            .store
            .open_trade(id, &symbol, qty, quote_amount, buy_avg)
            .await
        {
            // Bookkeeping only — protection still gets armed.
            error!(signal_id = id, error = %e, "failed to open trade row");
        }

        // --- OCO-ARMED.
        self.arm_oco(sig, &symbol, buy_avg).await
    }

    /// Size the sell, compute the bracket, place the OCO, persist the link.
    async fn arm_oco(
        &self,
        sig: &Signal,
        symbol: &str,
        buy_avg: f64,
    ) -> Result<ExecutionOutcome> {
        let id = sig.signal_id.as_str();
        let base = base_asset(symbol);

        let free = self.exchange.fetch_balance_free(&base).await?;

        let mut sell_amount = self
            .exchange
            .floor_amount(symbol, free * self.config.sell_buffer)
            .await?;
        if sell_amount <= 0.0 {
            sell_amount = self
                .exchange
                .floor_amount(symbol, free * self.config.sell_retry_buffer)
                .await?;
        }

        if sell_amount <= 0.0 {
            let msg = format!("{id} free_{base}={free}");
            warn!(signal_id = id, %msg, "no free base to protect — position is naked");
            self.audit("OCO_SKIP_NO_FREE_BASE", &msg).await;
            return Ok(ExecutionOutcome::Error("OCO_SKIP_NO_FREE_BASE".into()));
        }

        let tp_price = self
            .exchange
            .floor_price(symbol, buy_avg * (1.0 + self.config.tp_pct / 100.0))
            .await?;
        let sl_stop_price = self
            .exchange
            .floor_price(symbol, buy_avg * (1.0 - self.config.sl_pct / 100.0))
            .await?;
        let sl_limit_price = self
            .exchange
            .floor_price(symbol, sl_stop_price * (1.0 - self.config.sl_limit_gap_pct / 100.0))
            .await?;

        info!(
            signal_id = id,
            free_base = free,
            sell_amount,
            tp = tp_price,
            sl_stop = sl_stop_price,
            sl_limit = sl_limit_price,
            "oco prepared"
        );

        // Kill-switch re-check immediately before the wire call.
        if self.kill_switch.is_active().await {
            error!(signal_id = id, "kill-switch active at last gate — oco blocked");
            self.audit("EXEC_BLOCKED_KILL_SWITCH_LAST_GATE", &format!("{id} OCO_BLOCKED"))
                .await;
            return Ok(ExecutionOutcome::Blocked("KILL_SWITCH_LAST_GATE".into()));
        }

        let oco = self
            .exchange
            .place_oco_sell(symbol, sell_amount, tp_price, sl_stop_price, sl_limit_price)
            .await?;

        let ids = oco.extract_ids();
        let list_id = ids.list_order_id.clone().unwrap_or_default();
        let tp_id = ids.tp_order_id.clone().unwrap_or_default();
        let sl_id = ids.sl_order_id.clone().unwrap_or_default();

        info!(signal_id = id, list_order_id = %list_id, tp = %tp_id, sl = %sl_id, "oco placed");
        self.audit(
            "OCO_ARMED",
            &format!(
                "{id} symbol={symbol} listOrderId={list_id} tp={tp_id} sl={sl_id} amount={sell_amount}"
            ),
        )
        .await;

        // --- Protection invariant: list id present, child ids present and
        // distinct. Anything else means the entry sits unprotected.
        if !ids.valid() {
            let msg = format!(
                "{id} symbol={symbol} listOrderId={list_id} tp={tp_id} sl={sl_id} -> PROTECTION_FAILED"
            );
            error!(signal_id = id, %msg, "oco response failed validation");
            self.audit("OCO_INVALID", &msg).await;

            self.kill_switch.engage("OCO_INVALID").await;
            self.audit("FAILSAFE_KILL_SWITCH_SET", &format!("{id} OCO_INVALID"))
                .await;
            return Ok(ExecutionOutcome::Failsafe("OCO_INVALID".into()));
        }

        // --- PERSISTED.
        self.store
            .create_oco_link(
                id,
                symbol,
                &base,
                &tp_id,
                &sl_id,
                tp_price,
                sl_stop_price,
                sl_limit_price,
                sell_amount,
            )
            .await?;

        self.audit(
            "TRADE_LIVE_ARMED",
            &format!("{id} {symbol} OCO_ARMED listOrderId={list_id}"),
        )
        .await;

        Ok(ExecutionOutcome::Done)
    }

    // -------------------------------------------------------------------------
    // SELL handler (early exit)
    // -------------------------------------------------------------------------

    async fn execute_sell(&self, sig: &Signal) -> ExecutionOutcome {
        let id = sig.signal_id.as_str();
        let symbol = sig.symbol();

        info!(signal_id = id, symbol = %symbol, mode = %self.config.mode, "sell entered");

        if self.config.mode == Mode::Demo {
            self.audit("SELL_DEMO", &format!("{id} DEMO SELL {symbol}")).await;
            if let Err(e) = self.mark_executed(sig, "SELL_DEMO").await {
                error!(signal_id = id, error = %e, "failed to mark demo sell executed");
                return ExecutionOutcome::Error(format!("{e}"));
            }
            return ExecutionOutcome::Done;
        }

        // Kill-switch gate before any cancel or sell.
        if self.kill_switch.is_active().await {
            error!(signal_id = id, "kill-switch active — sell blocked");
            self.audit("SELL_BLOCKED_KILL_SWITCH_LAST_GATE", &format!("{id} {symbol}"))
                .await;
            return ExecutionOutcome::Blocked("KILL_SWITCH".into());
        }

        // Tear down active protection for this symbol, best-effort.
        let links = match self.store.list_active_oco_links(50).await {
            Ok(links) => links,
            Err(e) => {
                error!(signal_id = id, error = %e, "failed to list active links");
                self.audit("SELL_LIVE_ERROR", &format!("{id} {symbol} err={e}")).await;
                return ExecutionOutcome::Error(format!("{e}"));
            }
        };

        let mut canceled_signal_ids: Vec<String> = Vec::new();

        for link in links
            .iter()
            .filter(|l| l.symbol.to_uppercase() == symbol)
        {
            let tp = self.exchange.fetch_order(&link.tp_order_id, &symbol).await;
            let sl = self.exchange.fetch_order(&link.sl_order_id, &symbol).await;

            let (tp, sl) = match (tp, sl) {
                (Ok(tp), Ok(sl)) => (tp, sl),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(
                        signal_id = id,
                        link_id = link.id,
                        error = %e,
                        "oco leg lookup failed — skipping link"
                    );
                    continue;
                }
            };

            let tp_status = tp.status.trim().to_lowercase();
            let sl_status = sl.status.trim().to_lowercase();

            if CLOSED_STATUSES.contains(&tp_status.as_str()) {
                let _ = self
                    .store
                    .set_oco_status(link.id, crate::store::OcoStatus::ClosedTp)
                    .await;
                self.audit(
                    "SELL_SKIP",
                    &format!("{id} {symbol} already closed by TP (link={})", link.id),
                )
                .await;
                continue;
            }
            if CLOSED_STATUSES.contains(&sl_status.as_str()) {
                let _ = self
                    .store
                    .set_oco_status(link.id, crate::store::OcoStatus::ClosedSl)
                    .await;
                self.audit(
                    "SELL_SKIP",
                    &format!("{id} {symbol} already closed by SL (link={})", link.id),
                )
                .await;
                continue;
            }

            // Best-effort cancel of both legs.
            for order_id in [&link.tp_order_id, &link.sl_order_id] {
                if order_id.is_empty() {
                    continue;
                }
                if let Err(e) = self.exchange.cancel_order(order_id, &symbol).await {
                    warn!(
                        signal_id = id,
                        order_id = %order_id,
                        error = %e,
                        "oco leg cancel failed"
                    );
                }
            }

            let _ = self
                .store
                .set_oco_status(link.id, crate::store::OcoStatus::CanceledBySignal)
                .await;
            self.audit(
                "OCO_CANCELED",
                &format!("{id} {symbol} link={} canceled_by_signal", link.id),
            )
            .await;
            canceled_signal_ids.push(link.signal_id.clone());
        }

        // Market-sell the free base with the same buffer policy as OCO sizing.
        let base = base_asset(&symbol);
        let free = match self.exchange.fetch_balance_free(&base).await {
            Ok(f) => f,
            Err(e) => {
                error!(signal_id = id, error = %e, "balance fetch failed");
                self.audit("SELL_LIVE_ERROR", &format!("{id} {symbol} err={e}")).await;
                return ExecutionOutcome::Error(format!("{e}"));
            }
        };

        let sell_amount = match self.sized_sell_amount(&symbol, free).await {
            Ok(amount) => amount,
            Err(e) => {
                self.audit("SELL_LIVE_ERROR", &format!("{id} {symbol} err={e}")).await;
                return ExecutionOutcome::Error(format!("{e}"));
            }
        };

        if sell_amount <= 0.0 {
            let msg = format!("{id} symbol={symbol} free_{base}={free}");
            warn!(signal_id = id, %msg, "no free base to sell");
            self.audit("SELL_SKIP_NO_FREE_BASE", &msg).await;
            if let Err(e) = self.mark_executed(sig, "SELL_NO_FREE_BASE").await {
                error!(signal_id = id, error = %e, "failed to mark sell executed");
                return ExecutionOutcome::Error(format!("{e}"));
            }
            return ExecutionOutcome::Done;
        }

        match self.exchange.place_market_sell(&symbol, sell_amount).await {
            Ok(sell) => {
                let mut avg = sell.fill_price();
                if avg <= 0.0 {
                    avg = self.exchange.fetch_last_price(&symbol).await.unwrap_or(0.0);
                }

                info!(
                    signal_id = id,
                    symbol = %symbol,
                    amount = sell_amount,
                    avg,
                    order_id = %sell.id,
                    "live sell filled"
                );
                self.audit(
                    "SELL_LIVE_OK",
                    &format!("{id} {symbol} amount={sell_amount} avg={avg} order_id={}", sell.id),
                )
                .await;

                // Close the bookkeeping rows of the positions this sell exited.
                self.close_trades_manually(&canceled_signal_ids, avg).await;

                if let Err(e) = self.mark_executed(sig, "SELL_LIVE").await {
                    error!(signal_id = id, error = %e, "failed to mark sell executed");
                    return ExecutionOutcome::Error(format!("{e}"));
                }
                ExecutionOutcome::Done
            }
            Err(e) => {
                // Not marked executed: the next SELL signal may retry.
                error!(signal_id = id, error = %e, "live sell failed");
                self.audit("SELL_LIVE_ERROR", &format!("{id} {symbol} err={e}")).await;
                ExecutionOutcome::Error(format!("{e}"))
            }
        }
    }

    /// First the regular buffer, then the retry buffer when flooring to zero.
    async fn sized_sell_amount(&self, symbol: &str, free: f64) -> Result<f64> {
        let mut amount = self
            .exchange
            .floor_amount(symbol, free * self.config.sell_buffer)
            .await?;
        if amount <= 0.0 {
            amount = self
                .exchange
                .floor_amount(symbol, free * self.config.sell_retry_buffer)
                .await?;
        }
        Ok(amount)
    }

    /// Mark trades exited by an early sell as MANUAL closures.
    async fn close_trades_manually(&self, signal_ids: &[String], exit_price: f64) {
        if exit_price <= 0.0 {
            return;
        }
        for sid in signal_ids {
            match self.store.get_trade(sid).await {
                Ok(Some(trade)) if trade.closed_at.is_none() => {
                    let pnl_quote = (exit_price - trade.entry_price) * trade.qty;
                    let pnl_pct = if trade.quote_in > 0.0 {
                        pnl_quote / trade.quote_in * 100.0
                    } else {
                        0.0
                    };
                    if let Err(e) = self
                        .store
                        .close_trade(sid, exit_price, TradeOutcome::Manual, pnl_quote, pnl_pct)
                        .await
                    {
                        warn!(signal_id = %sid, error = %e, "failed to close trade on sell");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(signal_id = %sid, error = %e, "trade lookup failed on sell"),
            }
        }
    }
}

/// Exchange-side order statuses that mean "this leg filled".
pub const CLOSED_STATUSES: [&str; 2] = ["closed", "filled"];

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}
