//! Order quantity normalization against exchange filters.
//!
//! Exchanges only accept quantities on the LOT_SIZE step grid; anything else
//! is rejected after the round trip. Normalizing locally turns a would-be
//! rejection into an immediate `InvalidQuantity`.

use crate::error::{BotError, Result};
use crate::models::SymbolFilters;

/// Decimal places implied by a step size (0.001 -> 3, 1.0 -> 0)
pub fn step_precision(step_size: f64) -> u32 {
    if step_size >= 1.0 {
        0
    } else {
        (-step_size.log10()).round() as u32
    }
}

/// Floor `raw_qty` to the symbol's step-size grid and round to the implied
/// precision. Returns `InvalidQuantity` when the result is not submittable
/// (zero, negative, or below the filter minimum).
///
/// Idempotent: normalizing an already-normalized quantity is a no-op.
pub fn normalize(symbol: &str, raw_qty: f64, filters: &SymbolFilters) -> Result<f64> {
    if filters.step_size <= 0.0 {
        return Err(BotError::Configuration(format!(
            "non-positive step size for {symbol}"
        )));
    }

    let stepped = (raw_qty / filters.step_size).floor() * filters.step_size;

    // Flooring in binary floats leaves residue (0.123000000000000004);
    // snap to the decimal precision the step size implies.
    let factor = 10f64.powi(step_precision(filters.step_size) as i32);
    let qty = (stepped * factor).round() / factor;

    if qty <= 0.0 || qty < filters.min_qty {
        return Err(BotError::InvalidQuantity {
            symbol: symbol.to_string(),
            raw: raw_qty,
            normalized: qty,
        });
    }

    Ok(qty)
}

/// Whether an order of `qty` at `price` clears the symbol's minimum notional,
/// when the exchange advertises one.
pub fn meets_min_notional(qty: f64, price: f64, filters: &SymbolFilters) -> bool {
    match filters.min_notional {
        Some(min) => qty * price >= min,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(step_size: f64, min_qty: f64) -> SymbolFilters {
        SymbolFilters {
            step_size,
            min_qty,
            min_notional: None,
        }
    }

    #[test]
    fn test_normalize_floors_to_step() {
        let f = filters(0.001, 0.0);
        assert_eq!(normalize("BTCUSDT", 0.12345, &f).unwrap(), 0.123);
    }

    #[test]
    fn test_normalize_idempotent() {
        let f = filters(0.001, 0.0);
        let once = normalize("BTCUSDT", 0.987654, &f).unwrap();
        let twice = normalize("BTCUSDT", once, &f).unwrap();
        assert_eq!(once, twice);

        let f = filters(0.1, 0.0);
        let once = normalize("SOLUSDT", 3.14159, &f).unwrap();
        let twice = normalize("SOLUSDT", once, &f).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, 3.1);
    }

    #[test]
    fn test_normalize_whole_unit_step() {
        let f = filters(1.0, 0.0);
        assert_eq!(normalize("DOGEUSDT", 152.9, &f).unwrap(), 152.0);
    }

    #[test]
    fn test_normalize_rejects_zero_result() {
        let f = filters(0.001, 0.0);
        let err = normalize("BTCUSDT", 0.0004, &f).unwrap_err();
        assert!(matches!(err, BotError::InvalidQuantity { .. }));
    }

    #[test]
    fn test_normalize_rejects_below_min_qty() {
        let f = filters(0.001, 0.01);
        let err = normalize("BTCUSDT", 0.005, &f).unwrap_err();
        assert!(matches!(err, BotError::InvalidQuantity { .. }));
    }

    #[test]
    fn test_normalize_rejects_bad_step() {
        let f = filters(0.0, 0.0);
        let err = normalize("BTCUSDT", 1.0, &f).unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }

    #[test]
    fn test_step_precision() {
        assert_eq!(step_precision(0.001), 3);
        assert_eq!(step_precision(0.01), 2);
        assert_eq!(step_precision(0.1), 1);
        assert_eq!(step_precision(1.0), 0);
        assert_eq!(step_precision(10.0), 0);
    }

    #[test]
    fn test_min_notional() {
        let f = SymbolFilters {
            step_size: 0.001,
            min_qty: 0.0,
            min_notional: Some(10.0),
        };
        assert!(meets_min_notional(0.5, 30.0, &f));
        assert!(!meets_min_notional(0.1, 30.0, &f));

        let no_floor = filters(0.001, 0.0);
        assert!(meets_min_notional(0.0001, 1.0, &no_floor));
    }
}
