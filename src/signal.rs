// =============================================================================
// Signal Model — typed trade intents, validation, and content fingerprinting
// =============================================================================
//
// Signals arrive as untyped JSON in the outbox file. This module is the sole
// boundary between wire input and typed internal values: `validate` enforces
// the shape contract and `fingerprint` derives the content hash used for
// semantic dedupe. The caller-supplied `signal_id` is the idempotency key and
// deliberately never enters the fingerprint.
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Types
// =============================================================================

/// Final verdict of the decision layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Trade,
    Sell,
    Hold,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trade => write!(f, "TRADE"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Entry order specification. Only MARKET entries are accepted for TRADE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntrySpec {
    #[serde(default, rename = "type")]
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Execution block of a signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSpec {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub entry: EntrySpec,
    /// Base-denominated size. Mutually optional with `quote_amount`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size: Option<f64>,
    /// Quote-denominated size. Mutually optional with `position_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_amount: Option<f64>,
}

/// A trade intent popped from (or appended to) the outbox.
///
/// Unknown wire fields are tolerated and dropped; the fields below are the
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub final_verdict: Verdict,
    #[serde(default)]
    pub certified_signal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_utc: Option<String>,
    #[serde(default)]
    pub execution: ExecutionSpec,
    /// Content hash attached by the outbox on ingest.
    #[serde(default, rename = "_fingerprint", skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Signal {
    /// Uppercased symbol from the execution block.
    pub fn symbol(&self) -> String {
        self.execution.symbol.trim().to_uppercase()
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Enforce the signal shape contract.
///
/// * verdict must be TRADE / HOLD / SELL (enforced by the enum at parse time)
/// * `certified_signal` must be true
/// * `execution.symbol` non-empty, `direction` LONG
/// * TRADE: `entry.type` MARKET and at least one of `position_size > 0`
///   or `quote_amount > 0`
/// * SELL: size optional (the controller sells free balance)
pub fn validate(signal: &Signal) -> Result<()> {
    if !signal.certified_signal {
        bail!("NOT_CERTIFIED");
    }
    if signal.signal_id.trim().is_empty() {
        bail!("MISSING_SIGNAL_ID");
    }

    let symbol = signal.execution.symbol.trim();
    if symbol.is_empty() {
        bail!("MISSING_EXEC_SYMBOL");
    }

    let direction = signal.execution.direction.trim().to_uppercase();
    if direction != "LONG" {
        bail!("INVALID_DIRECTION");
    }

    if signal.final_verdict == Verdict::Trade {
        let entry_type = signal.execution.entry.entry_type.trim().to_uppercase();
        if entry_type != "MARKET" {
            bail!("INVALID_ENTRY_TYPE");
        }

        let pos_ok = signal.execution.position_size.map_or(false, |p| p > 0.0);
        let quote_ok = signal.execution.quote_amount.map_or(false, |q| q > 0.0);
        if !pos_ok && !quote_ok {
            bail!("INVALID_POSITION_SIZE");
        }
    }

    Ok(())
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Canonical-form version tag. Never reuse `v1:` for a different layout.
const FINGERPRINT_VERSION: &str = "v1";

/// SHA-256 hex over the canonical content string.
///
/// Canonical form: `v1:{VERDICT}:{SYMBOL}:{DIRECTION}:{ENTRY_TYPE}:{pos_size}`
/// with `pos_size` rendered as the float value or `none`. The signal id is a
/// retry-scoped UUID and MUST NOT perturb the fingerprint: the fingerprint
/// identifies semantic duplicates across retries and regenerations.
pub fn fingerprint(signal: &Signal) -> String {
    let symbol = signal.execution.symbol.trim().to_uppercase();
    let direction = signal.execution.direction.trim().to_uppercase();
    let entry_type = signal.execution.entry.entry_type.trim().to_uppercase();
    let pos_size = match signal.execution.position_size {
        Some(p) => format!("{p}"),
        None => "none".to_string(),
    };

    let base = format!(
        "{FINGERPRINT_VERSION}:{}:{symbol}:{direction}:{entry_type}:{pos_size}",
        signal.final_verdict
    );

    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    hex::encode(hasher.finalize())
}
