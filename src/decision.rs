// =============================================================================
// Decision Engine — narrow interface between signal generation and execution
// =============================================================================
//
// The worker loop invokes the engine through this trait only; the execution
// controller never calls back into it. The reference implementation below is
// a deliberately simple momentum generator: it exists so the DEMO pipeline
// can run end-to-end without an external signal source, and it is disabled
// by default.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::exchange::ExchangeApi;
use crate::signal::{EntrySpec, ExecutionSpec, Signal, Verdict};
use crate::store::Store;

/// Anything that can produce the next trade intent.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Evaluate the market and return at most one fresh signal.
    async fn generate(&self) -> Result<Option<Signal>>;
}

// =============================================================================
// MomentumGenerator
// =============================================================================

/// Candle interval the generator evaluates.
const INTERVAL: &str = "15m";
/// Candles fetched per evaluation.
const CANDLE_LIMIT: u32 = 50;
/// Minimum history before a verdict is attempted.
const MIN_CANDLES: usize = 25;
/// Moving-average window.
const MA_WINDOW: usize = 20;

/// Reference generator: last close above its 20-period mean and rising.
///
/// Emission is throttled by a cooldown and suppressed while the symbol
/// already carries an ACTIVE protection link or while the previous emission
/// had the same (symbol, direction) signature.
pub struct MomentumGenerator {
    config: AppConfig,
    store: Store,
    exchange: Arc<dyn ExchangeApi>,
    last_emit: RwLock<Option<Instant>>,
    last_signature: RwLock<Option<(String, String)>>,
}

impl MomentumGenerator {
    pub fn new(config: AppConfig, store: Store, exchange: Arc<dyn ExchangeApi>) -> Self {
        Self {
            config,
            store,
            exchange,
            last_emit: RwLock::new(None),
            last_signature: RwLock::new(None),
        }
    }

    fn cooldown_ok(&self) -> bool {
        match *self.last_emit.read() {
            None => true,
            Some(t) => t.elapsed().as_secs() >= self.config.generator_cooldown_seconds,
        }
    }

    fn sma(values: &[f64], window: usize) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let n = window.min(values.len());
        let slice = &values[values.len() - n..];
        slice.iter().sum::<f64>() / n as f64
    }

    fn build_signal(&self, symbol: &str) -> Signal {
        Signal {
            signal_id: Uuid::new_v4().to_string(),
            final_verdict: Verdict::Trade,
            certified_signal: true,
            timestamp_utc: Some(chrono::Utc::now().to_rfc3339()),
            execution: ExecutionSpec {
                symbol: symbol.to_string(),
                direction: "LONG".into(),
                entry: EntrySpec {
                    entry_type: "MARKET".into(),
                    price: None,
                },
                position_size: None,
                quote_amount: Some(self.config.quote_per_trade),
            },
            fingerprint: None,
        }
    }
}

#[async_trait]
impl DecisionEngine for MomentumGenerator {
    async fn generate(&self) -> Result<Option<Signal>> {
        if !self.cooldown_ok() {
            debug!("generator cooldown active");
            return Ok(None);
        }

        for symbol in &self.config.symbol_whitelist {
            // Never stack intents onto a symbol that is already protected. A
            // failed lookup reads as "protected" — conservative.
            let active = self
                .store
                .has_active_oco_for_symbol(symbol)
                .await
                .unwrap_or_else(|e| {
                    warn!(symbol = %symbol, error = %e, "active OCO lookup failed — assuming active");
                    true
                });
            if active {
                debug!(symbol = %symbol, "skipping — symbol has active protection");
                continue;
            }

            let closes = match self
                .exchange
                .fetch_recent_closes(symbol, INTERVAL, CANDLE_LIMIT)
                .await
            {
                Ok(closes) => closes,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "candle fetch failed");
                    continue;
                }
            };

            if closes.len() < MIN_CANDLES {
                debug!(
                    symbol = %symbol,
                    got = closes.len(),
                    need = MIN_CANDLES,
                    "not enough candles"
                );
                continue;
            }

            let last = closes[closes.len() - 1];
            let prev = closes[closes.len() - 2];
            let ma = Self::sma(&closes, MA_WINDOW);

            if !(last > ma && last > prev) {
                debug!(symbol = %symbol, last, prev, ma, "no momentum condition");
                continue;
            }

            let signature = (symbol.clone(), "LONG".to_string());
            if self.last_signature.read().as_ref() == Some(&signature) {
                // Same setup as last time: reset the clock, emit nothing.
                *self.last_emit.write() = Some(Instant::now());
                debug!(symbol = %symbol, "duplicate signature — suppressed");
                continue;
            }

            let signal = self.build_signal(symbol);
            *self.last_emit.write() = Some(Instant::now());
            *self.last_signature.write() = Some(signature);

            info!(
                signal_id = %signal.signal_id,
                symbol = %symbol,
                last,
                ma,
                "momentum signal generated"
            );
            return Ok(Some(signal));
        }

        Ok(None)
    }
}

impl std::fmt::Debug for MomentumGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MomentumGenerator")
            .field("symbols", &self.config.symbol_whitelist)
            .field("cooldown_seconds", &self.config.generator_cooldown_seconds)
            .finish_non_exhaustive()
    }
}
