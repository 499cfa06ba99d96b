// =============================================================================
// Application Configuration — environment-driven settings, resolved once at boot
// =============================================================================
//
// Every tunable of the executor lives here. Values are read from the process
// environment (with a dev-time `.env` loaded by the entrypoint) and resolved
// into a typed `AppConfig` that is handed to constructors explicitly; nothing
// reads the environment after boot.
//
// SAFETY: the kill-switch defaults to ON and the mode defaults to DEMO, so a
// fresh deployment with no environment cannot place an order.
// =============================================================================

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Mode
// =============================================================================

/// Exchange interaction mode.
///
/// * `Demo`    — no order ever reaches the network; entries are simulated.
/// * `Testnet` — orders go to the exchange testnet REST base.
/// * `Live`    — real funds; additionally gated by `live_confirmation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Demo,
    Testnet,
    Live,
}

impl Mode {
    /// Parse from the `MODE` environment value. Unknown values fall back to
    /// `Demo` rather than erroring: misconfiguration must never escalate
    /// privileges.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "LIVE" => Self::Live,
            "TESTNET" => Self::Testnet,
            _ => Self::Demo,
        }
    }

    /// True for the modes that talk to a real REST endpoint.
    pub fn is_networked(self) -> bool {
        matches!(self, Self::Live | Self::Testnet)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "DEMO"),
            Self::Testnet => write!(f, "TESTNET"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

// =============================================================================
// Env helpers
// =============================================================================

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .to_string()
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

// =============================================================================
// AppConfig
// =============================================================================

/// Default REST bases. Overridable for tests and regional endpoints.
const DEFAULT_REST_BASE_LIVE: &str = "https://api.binance.com";
const DEFAULT_REST_BASE_TESTNET: &str = "https://testnet.binance.vision";

/// Resolved configuration for one worker process.
#[derive(Clone)]
pub struct AppConfig {
    // --- Operational modes ---------------------------------------------------
    pub mode: Mode,
    /// Environment half of the kill-switch. The persisted half lives in the
    /// store; either one blocks trading.
    pub env_kill_switch: bool,
    /// Must be true for any order to be placed in LIVE mode.
    pub live_confirmation: bool,

    // --- Paths ---------------------------------------------------------------
    pub db_path: PathBuf,
    pub outbox_path: PathBuf,

    // --- Trading universe & caps --------------------------------------------
    /// Symbols the executor may trade, in `BASE/QUOTE` form.
    pub symbol_whitelist: Vec<String>,
    /// Hard cap on quote currency committed per order.
    pub max_quote_per_trade: f64,

    // --- Bracket geometry ----------------------------------------------------
    pub tp_pct: f64,
    pub sl_pct: f64,
    pub sl_limit_gap_pct: f64,

    // --- Sell sizing buffers -------------------------------------------------
    /// Fraction of free base offered on the first sizing attempt.
    pub sell_buffer: f64,
    /// Smaller fallback fraction when the first attempt floors to zero.
    pub sell_retry_buffer: f64,

    // --- Execution-side edge gate --------------------------------------------
    pub estimated_roundtrip_fee_pct: f64,
    pub estimated_slippage_pct: f64,
    pub min_net_profit_pct: f64,

    // --- Worker cadence ------------------------------------------------------
    pub loop_sleep_seconds: f64,

    // --- Decision engine (optional) ------------------------------------------
    pub generator_enabled: bool,
    pub quote_per_trade: f64,
    pub generator_cooldown_seconds: u64,

    // --- DEMO wallet ---------------------------------------------------------
    pub virtual_start_balance: f64,

    // --- Exchange credentials & endpoints ------------------------------------
    pub api_key: String,
    pub api_secret: String,
    pub rest_base_live: String,
    pub rest_base_testnet: String,
}

impl AppConfig {
    /// Read every setting from the environment.
    pub fn from_env() -> Self {
        let mode = Mode::parse(&env_str("MODE", "DEMO"));

        let whitelist: Vec<String> = env_str("SYMBOL_WHITELIST", "BTC/USDT")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            mode,
            // Default ON: an unconfigured deployment must not trade.
            env_kill_switch: env_bool("KILL_SWITCH", true),
            live_confirmation: env_bool("LIVE_CONFIRMATION", false),

            db_path: PathBuf::from(env_str("DB_PATH", "/var/data/meridian.db")),
            outbox_path: PathBuf::from(env_str(
                "SIGNAL_OUTBOX_PATH",
                "/var/data/signal_outbox.json",
            )),

            symbol_whitelist: whitelist,
            max_quote_per_trade: env_f64("MAX_QUOTE_PER_TRADE", 50.0),

            tp_pct: env_f64("TP_PCT", 1.30),
            sl_pct: env_f64("SL_PCT", 0.70),
            sl_limit_gap_pct: env_f64("SL_LIMIT_GAP_PCT", 0.15),

            sell_buffer: env_f64("SELL_BUFFER", 0.999),
            sell_retry_buffer: env_f64("SELL_RETRY_BUFFER", 0.998),

            estimated_roundtrip_fee_pct: env_f64("ESTIMATED_ROUNDTRIP_FEE_PCT", 0.20),
            estimated_slippage_pct: env_f64("ESTIMATED_SLIPPAGE_PCT", 0.15),
            min_net_profit_pct: env_f64("MIN_NET_PROFIT_PCT", 0.60),

            loop_sleep_seconds: env_f64("LOOP_SLEEP_SECONDS", 10.0),

            generator_enabled: env_bool("GENERATOR_ENABLED", false),
            quote_per_trade: env_f64("QUOTE_PER_TRADE", 15.0),
            generator_cooldown_seconds: env_u64("GENERATOR_COOLDOWN_SECONDS", 180),

            virtual_start_balance: env_f64("VIRTUAL_START_BALANCE", 100_000.0),

            api_key: env_str("BINANCE_API_KEY", ""),
            api_secret: env_str("BINANCE_API_SECRET", ""),
            rest_base_live: env_str("REST_BASE_LIVE", DEFAULT_REST_BASE_LIVE),
            rest_base_testnet: env_str("REST_BASE_TESTNET", DEFAULT_REST_BASE_TESTNET),
        }
    }

    /// Validate the settings that are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.mode.is_networked() && (self.api_key.is_empty() || self.api_secret.is_empty()) {
            bail!("{} mode requires BINANCE_API_KEY and BINANCE_API_SECRET", self.mode);
        }
        if self.symbol_whitelist.is_empty() {
            bail!("SYMBOL_WHITELIST resolved to an empty list");
        }
        if !(self.sell_buffer > 0.0 && self.sell_buffer <= 1.0) {
            bail!("SELL_BUFFER must be in (0, 1], got {}", self.sell_buffer);
        }
        if !(self.sell_retry_buffer > 0.0 && self.sell_retry_buffer <= 1.0) {
            bail!(
                "SELL_RETRY_BUFFER must be in (0, 1], got {}",
                self.sell_retry_buffer
            );
        }
        if self.max_quote_per_trade <= 0.0 {
            bail!(
                "MAX_QUOTE_PER_TRADE must be positive, got {}",
                self.max_quote_per_trade
            );
        }
        if self.loop_sleep_seconds <= 0.0 {
            bail!(
                "LOOP_SLEEP_SECONDS must be positive, got {}",
                self.loop_sleep_seconds
            );
        }
        Ok(())
    }

    /// REST base for the current mode. DEMO has no REST base for trading; the
    /// live base is still used for public market data (ticker, klines).
    pub fn rest_base(&self) -> &str {
        match self.mode {
            Mode::Testnet => &self.rest_base_testnet,
            _ => &self.rest_base_live,
        }
    }

    /// True when `symbol` (any casing) is on the whitelist.
    pub fn symbol_whitelisted(&self, symbol: &str) -> bool {
        let upper = symbol.trim().to_uppercase();
        self.symbol_whitelist.iter().any(|s| *s == upper)
    }

    /// Log a redacted summary of the effective configuration.
    pub fn log_summary(&self) {
        info!(
            mode = %self.mode,
            env_kill_switch = self.env_kill_switch,
            live_confirmation = self.live_confirmation,
            db_path = %self.db_path.display(),
            outbox_path = %self.outbox_path.display(),
            symbols = ?self.symbol_whitelist,
            max_quote_per_trade = self.max_quote_per_trade,
            tp_pct = self.tp_pct,
            sl_pct = self.sl_pct,
            sl_limit_gap_pct = self.sl_limit_gap_pct,
            loop_sleep_seconds = self.loop_sleep_seconds,
            generator_enabled = self.generator_enabled,
            "configuration resolved"
        );
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("mode", &self.mode)
            .field("env_kill_switch", &self.env_kill_switch)
            .field("live_confirmation", &self.live_confirmation)
            .field("db_path", &self.db_path)
            .field("outbox_path", &self.outbox_path)
            .field("symbol_whitelist", &self.symbol_whitelist)
            .field("max_quote_per_trade", &self.max_quote_per_trade)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Symbol helpers
// =============================================================================

/// Base asset of a `BASE/QUOTE` symbol (`"BTC/USDT"` -> `"BTC"`).
pub fn base_asset(symbol: &str) -> String {
    symbol
        .split('/')
        .next()
        .unwrap_or(symbol)
        .trim()
        .to_uppercase()
}

/// Wire form of a symbol (`"BTC/USDT"` -> `"BTCUSDT"`).
pub fn wire_symbol(symbol: &str) -> String {
    symbol.replace('/', "").trim().to_uppercase()
}

/// A minimal valid configuration for unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        mode: Mode::Demo,
        env_kill_switch: false,
        live_confirmation: false,
        db_path: PathBuf::from(":memory:"),
        outbox_path: PathBuf::from("/tmp/outbox.json"),
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
        loop_sleep_seconds: 10.0,
        generator_enabled: false,
        quote_per_trade: 15.0,
        generator_cooldown_seconds: 180,
        virtual_start_balance: 100_000.0,
        api_key: "key".into(),
        api_secret: "secret".into(),
        rest_base_live: "https://api.binance.com".into(),
        rest_base_testnet: "https://testnet.binance.vision".into(),
    }
}
