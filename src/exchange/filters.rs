// =============================================================================
// Exchange Filters — tick/lot/notional constraints and grid flooring
// =============================================================================
//
// The exchange rejects any amount or price that is not on its discretisation
// grid. Everything submitted on the wire is floored to the symbol's step here,
// through integer arithmetic on scaled values, and rendered as a string at the
// step's own decimal precision. Raw floating arithmetic never reaches the
// wire.
// =============================================================================

use anyhow::{bail, Context, Result};
use serde_json::Value;

// =============================================================================
// SymbolFilters
// =============================================================================

/// Per-symbol trading constraints parsed from exchangeInfo.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    /// Minimum order notional in quote currency.
    pub min_notional: f64,
    /// LOT_SIZE step, kept as the exchange's own decimal string.
    pub lot_step: String,
    /// PRICE_FILTER tick, kept as the exchange's own decimal string.
    pub price_tick: String,
}

impl SymbolFilters {
    /// Parse the filters of one exchangeInfo symbol entry.
    ///
    /// Only symbols carrying both `LOT_SIZE` and `PRICE_FILTER` may be traded;
    /// anything else is an error.
    pub fn parse(symbol_info: &Value) -> Result<Self> {
        let filters = symbol_info["filters"]
            .as_array()
            .context("exchangeInfo symbol entry missing 'filters' array")?;

        let mut lot_step: Option<String> = None;
        let mut price_tick: Option<String> = None;
        let mut min_notional: f64 = 0.0;

        for f in filters {
            match f["filterType"].as_str().unwrap_or("") {
                "LOT_SIZE" => {
                    lot_step = f["stepSize"].as_str().map(|s| s.to_string());
                }
                "PRICE_FILTER" => {
                    price_tick = f["tickSize"].as_str().map(|s| s.to_string());
                }
                // Binance renamed MIN_NOTIONAL to NOTIONAL; accept both.
                "MIN_NOTIONAL" => {
                    min_notional = f["minNotional"]
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0.0);
                }
                "NOTIONAL" => {
                    min_notional = f["minNotional"]
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0.0);
                }
                _ => {}
            }
        }

        let lot_step = lot_step.context("symbol has no LOT_SIZE filter — not tradable")?;
        let price_tick = price_tick.context("symbol has no PRICE_FILTER filter — not tradable")?;

        Ok(Self {
            min_notional,
            lot_step,
            price_tick,
        })
    }

    /// Numeric lot step.
    pub fn lot_step_size(&self) -> f64 {
        self.lot_step.parse().unwrap_or(0.0)
    }

    /// Numeric price tick.
    pub fn price_tick_size(&self) -> f64 {
        self.price_tick.parse().unwrap_or(0.0)
    }
}

// =============================================================================
// Grid flooring
// =============================================================================

/// A value floored to an exchange step, with its wire rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Floored {
    /// Floored numeric value, for comparisons and persistence.
    pub value: f64,
    /// Wire rendering at the step's decimal precision.
    pub text: String,
}

/// Number of significant fractional digits in a step string
/// (`"0.00100000"` -> 3, `"1.00000000"` -> 0).
pub fn step_decimals(step: &str) -> usize {
    match step.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len(),
        None => 0,
    }
}

/// Floor `value` onto the grid defined by `step`.
///
/// Arithmetic runs on integers scaled by the step's decimal precision; a tiny
/// relative epsilon absorbs float representation artifacts (e.g. a product
/// that lands at `14.999999999999998` still floors to 15 steps, while a true
/// `14.985` floors to 14). Negative inputs clamp to zero. Idempotent:
/// `floor(floor(x)) == floor(x)`.
pub fn floor_to_step(value: f64, step: &str) -> Result<Floored> {
    let step_value: f64 = step
        .trim()
        .parse()
        .with_context(|| format!("unparsable step '{step}'"))?;
    if step_value <= 0.0 {
        bail!("step must be positive, got '{step}'");
    }

    let decimals = step_decimals(step);
    let scale = 10f64.powi(decimals as i32);

    // Step in scaled integer units (e.g. "0.00500" with decimals=3 -> 5).
    let step_units = (step_value * scale).round() as i128;
    if step_units <= 0 {
        bail!("step '{step}' collapses to zero at its own precision");
    }

    if value <= 0.0 {
        return Ok(Floored {
            value: 0.0,
            text: format!("{:.*}", decimals, 0.0),
        });
    }

    let scaled = (value * scale * (1.0 + 1e-9) + 1e-12).floor() as i128;
    let floored_units = scaled - scaled.rem_euclid(step_units);

    let floored = floored_units as f64 / scale;
    Ok(Floored {
        value: floored,
        text: format!("{:.*}", decimals, floored),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_filters_from_exchange_info_entry() {
        let info = json!({
            "symbol": "BTCUSDT",
            "filters": [
                { "filterType": "PRICE_FILTER", "tickSize": "0.01000000" },
                { "filterType": "LOT_SIZE", "stepSize": "0.00001000" },
                { "filterType": "NOTIONAL", "minNotional": "10.00000000" }
            ]
        });

        let f = SymbolFilters::parse(&info).unwrap();
        assert_eq!(f.lot_step, "0.00001000");
        assert_eq!(f.price_tick, "0.01000000");
        assert!((f.min_notional - 10.0).abs() < 1e-12);
        assert!((f.lot_step_size() - 1e-5).abs() < 1e-12);
        assert!((f.price_tick_size() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn legacy_min_notional_filter_is_accepted() {
        let info = json!({
            "filters": [
                { "filterType": "PRICE_FILTER", "tickSize": "0.01" },
                { "filterType": "LOT_SIZE", "stepSize": "0.001" },
                { "filterType": "MIN_NOTIONAL", "minNotional": "5.00" }
            ]
        });
        let f = SymbolFilters::parse(&info).unwrap();
        assert!((f.min_notional - 5.0).abs() < 1e-12);
    }

    #[test]
    fn missing_lot_size_makes_symbol_untradable() {
        let info = json!({
            "filters": [
                { "filterType": "PRICE_FILTER", "tickSize": "0.01" }
            ]
        });
        assert!(SymbolFilters::parse(&info).is_err());
    }

    #[test]
    fn step_decimals_trims_trailing_zeros() {
        assert_eq!(step_decimals("0.00001000"), 5);
        assert_eq!(step_decimals("0.01000000"), 2);
        assert_eq!(step_decimals("1.00000000"), 0);
        assert_eq!(step_decimals("1"), 0);
        assert_eq!(step_decimals("0.1"), 1);
    }

    #[test]
    fn floors_amount_onto_lot_grid() {
        // 0.00015 * 0.999 = 0.00014985 -> one lot step below.
        let f = floor_to_step(0.00015 * 0.999, "0.00001000").unwrap();
        assert!((f.value - 0.00014).abs() < 1e-12);
        assert_eq!(f.text, "0.00014");
    }

    #[test]
    fn floors_price_onto_tick_grid() {
        // 99300 * (1 - 0.15/100) = 99151.05 exactly on the grid.
        let f = floor_to_step(99_300.0 * (1.0 - 0.15 / 100.0), "0.01000000").unwrap();
        assert!((f.value - 99_151.05).abs() < 1e-9);
        assert_eq!(f.text, "99151.05");

        // 100000 * 1.013 = 101300.00
        let f = floor_to_step(100_000.0 * (1.0 + 1.3 / 100.0), "0.01000000").unwrap();
        assert_eq!(f.text, "101300.00");
    }

    #[test]
    fn flooring_is_idempotent() {
        for (value, step) in [
            (0.00014985, "0.00001000"),
            (99_151.0499, "0.01000000"),
            (123.456, "0.05"),
            (7.0, "1.00000000"),
        ] {
            let once = floor_to_step(value, step).unwrap();
            let twice = floor_to_step(once.value, step).unwrap();
            assert_eq!(once, twice, "value={value} step={step}");
        }
    }

    #[test]
    fn non_power_of_ten_steps_are_respected() {
        let f = floor_to_step(1.23, "0.05").unwrap();
        assert_eq!(f.text, "1.20");
        let f = floor_to_step(1.24999, "0.05").unwrap();
        assert_eq!(f.text, "1.20");
        let f = floor_to_step(1.25, "0.05").unwrap();
        assert_eq!(f.text, "1.25");
    }

    #[test]
    fn tiny_value_floors_to_zero() {
        let f = floor_to_step(0.0000042, "0.00001000").unwrap();
        assert!((f.value - 0.0).abs() < 1e-15);
        assert_eq!(f.text, "0.00000");
    }

    #[test]
    fn negative_value_clamps_to_zero() {
        let f = floor_to_step(-5.0, "0.01").unwrap();
        assert_eq!(f.value, 0.0);
    }

    #[test]
    fn float_artifact_does_not_drop_a_step() {
        // 0.1 + 0.2 is famously 0.30000000000000004; flooring on a 0.1 grid
        // must still give 0.3, and 0.29999999999999993 must as well.
        let f = floor_to_step(0.1 + 0.2, "0.1").unwrap();
        assert_eq!(f.text, "0.3");
        let f = floor_to_step(0.299_999_999_999_999_93, "0.1").unwrap();
        assert_eq!(f.text, "0.3");
    }
}
