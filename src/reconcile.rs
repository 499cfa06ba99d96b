// =============================================================================
// OCO Reconciler — sweep active protection links to their terminal outcome
// =============================================================================
//
// Runs on the worker cadence. For each ACTIVE link (bounded batch) both legs
// are fetched and classified:
//
//   | tp          | sl          | action                         |
//   |-------------|-------------|--------------------------------|
//   | —           | filled      | link -> CLOSED_SL              |
//   | filled      | —           | link -> CLOSED_TP              |
//   | canceled    | open        | keep ACTIVE                    |
//   | open        | canceled    | keep ACTIVE                    |
//   | canceled    | canceled    | link -> FAILED                 |
//   | otherwise   |             | keep ACTIVE                    |
//
// A terminal transition also records realized PnL on the trade row, priced
// from the filled leg. Transient per-link fetch failures log and skip that
// link; the sweep continues.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::exchange::{ExchangeApi, OrderInfo};
use crate::store::{OcoLink, OcoStatus, Store, TradeOutcome};

/// Links examined per sweep.
const SWEEP_LIMIT: i64 = 50;

/// Statuses that mean the leg filled.
const CLOSED: [&str; 2] = ["closed", "filled"];
/// Statuses that mean the leg was removed without filling.
const CANCELED: [&str; 4] = ["canceled", "cancelled", "expired", "rejected"];
/// Statuses that mean the leg is still resting.
const OPEN: [&str; 3] = ["open", "new", "partially_filled"];

pub struct OcoReconciler {
    config: AppConfig,
    store: Store,
    exchange: Arc<dyn ExchangeApi>,
}

impl OcoReconciler {
    pub fn new(config: AppConfig, store: Store, exchange: Arc<dyn ExchangeApi>) -> Self {
        Self {
            config,
            store,
            exchange,
        }
    }

    /// One sweep over the ACTIVE links. Returns how many links transitioned.
    pub async fn reconcile_once(&self) -> Result<u32> {
        // Nothing to reconcile without an exchange-side order book.
        if !self.config.mode.is_networked() {
            return Ok(0);
        }

        let links = self.store.list_active_oco_links(SWEEP_LIMIT).await?;
        if links.is_empty() {
            return Ok(0);
        }

        let mut transitions = 0u32;

        for link in &links {
            if link.tp_order_id.is_empty() || link.sl_order_id.is_empty() {
                warn!(
                    link_id = link.id,
                    tp = %link.tp_order_id,
                    sl = %link.sl_order_id,
                    "link is missing order ids — skipping"
                );
                continue;
            }

            match self.reconcile_link(link).await {
                Ok(true) => transitions += 1,
                Ok(false) => {}
                Err(e) => {
                    // Transient: keep the link for the next sweep.
                    warn!(
                        link_id = link.id,
                        symbol = %link.symbol,
                        error = %e,
                        "link reconcile failed — will retry next sweep"
                    );
                }
            }
        }

        if transitions > 0 {
            info!(transitions, swept = links.len(), "reconcile sweep complete");
        } else {
            debug!(swept = links.len(), "reconcile sweep complete — no transitions");
        }
        Ok(transitions)
    }

    /// Classify one link. Returns `true` when the link left ACTIVE.
    async fn reconcile_link(&self, link: &OcoLink) -> Result<bool> {
        let tp = self
            .exchange
            .fetch_order(&link.tp_order_id, &link.symbol)
            .await?;
        let sl = self
            .exchange
            .fetch_order(&link.sl_order_id, &link.symbol)
            .await?;

        let tp_status = tp.status.trim().to_lowercase();
        let sl_status = sl.status.trim().to_lowercase();

        debug!(
            link_id = link.id,
            signal_id = %link.signal_id,
            symbol = %link.symbol,
            tp = %format!("{}:{tp_status}", link.tp_order_id),
            sl = %format!("{}:{sl_status}", link.sl_order_id),
            "link statuses fetched"
        );

        // SL filled wins the classification: the position was stopped out.
        if CLOSED.contains(&sl_status.as_str()) {
            self.store.set_oco_status(link.id, OcoStatus::ClosedSl).await?;
            self.store
                .log_event(
                    "OCO_CLOSED",
                    &format!(
                        "{} SL_FILLED sl={} tp={} tp_status={tp_status}",
                        link.signal_id, link.sl_order_id, link.tp_order_id
                    ),
                )
                .await?;
            self.record_exit(link, &sl, link.sl_stop_price, TradeOutcome::Sl)
                .await;
            return Ok(true);
        }

        if CLOSED.contains(&tp_status.as_str()) {
            self.store.set_oco_status(link.id, OcoStatus::ClosedTp).await?;
            self.store
                .log_event(
                    "OCO_CLOSED",
                    &format!(
                        "{} TP_FILLED tp={} sl={} sl_status={sl_status}",
                        link.signal_id, link.tp_order_id, link.sl_order_id
                    ),
                )
                .await?;
            self.record_exit(link, &tp, link.tp_price, TradeOutcome::Tp)
                .await;
            return Ok(true);
        }

        // One leg canceled while the other still rests: the pair is still
        // protective; leave it for the exchange (or a later sweep) to settle.
        let tp_canceled = CANCELED.contains(&tp_status.as_str());
        let sl_canceled = CANCELED.contains(&sl_status.as_str());
        let tp_open = OPEN.contains(&tp_status.as_str());
        let sl_open = OPEN.contains(&sl_status.as_str());

        if (tp_canceled && sl_open) || (sl_canceled && tp_open) {
            return Ok(false);
        }

        // Both legs gone without a fill: the position lost its protection.
        if tp_canceled && sl_canceled {
            self.store.set_oco_status(link.id, OcoStatus::Failed).await?;
            self.store
                .log_event(
                    "OCO_FAILED",
                    &format!(
                        "{} tp={}:{tp_status} sl={}:{sl_status}",
                        link.signal_id, link.tp_order_id, link.sl_order_id
                    ),
                )
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Record realized PnL on the trade row, if one exists and is still open.
    ///
    /// Exit price preference: the filled leg's reported average, then its
    /// limit price, then the bracket price stored on the link.
    async fn record_exit(
        &self,
        link: &OcoLink,
        filled_leg: &OrderInfo,
        bracket_price: f64,
        outcome: TradeOutcome,
    ) {
        let exit_price = if filled_leg.fill_price() > 0.0 {
            filled_leg.fill_price()
        } else {
            bracket_price
        };

        let trade = match self.store.get_trade(&link.signal_id).await {
            Ok(Some(trade)) if trade.closed_at.is_none() => trade,
            Ok(_) => return,
            Err(e) => {
                warn!(signal_id = %link.signal_id, error = %e, "trade lookup failed");
                return;
            }
        };

        let pnl_quote = (exit_price - trade.entry_price) * trade.qty;
        let pnl_pct = if trade.quote_in > 0.0 {
            pnl_quote / trade.quote_in * 100.0
        } else {
            0.0
        };

        if let Err(e) = self
            .store
            .close_trade(&link.signal_id, exit_price, outcome, pnl_quote, pnl_pct)
            .await
        {
            warn!(signal_id = %link.signal_id, error = %e, "failed to close trade");
            return;
        }

        info!(
            signal_id = %link.signal_id,
            symbol = %link.symbol,
            exit_price,
            pnl_quote,
            pnl_pct,
            outcome = %outcome,
            "realized pnl recorded"
        );
    }
}

impl std::fmt::Debug for OcoReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcoReconciler")
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}
