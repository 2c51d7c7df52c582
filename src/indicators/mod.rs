// Technical indicators module
// Pure functions: same input always yields the same output.

pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use macd::{calculate_macd, latest_macd};
pub use moving_average::{calculate_ema, calculate_sma, ema_series};
pub use rsi::calculate_rsi;

use crate::models::StrategyParams;

/// Latest indicator values for one symbol, computed from a close-price
/// history. Any indicator without enough history is None.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
}

impl IndicatorSet {
    pub fn compute(closes: &[f64], params: &StrategyParams) -> Self {
        let (macd, macd_signal) = latest_macd(
            closes,
            params.macd_fast,
            params.macd_slow,
            params.macd_signal,
        );

        Self {
            ema_short: calculate_ema(closes, params.ema_short_period),
            ema_long: calculate_ema(closes, params.ema_long_period),
            rsi: calculate_rsi(closes, params.rsi_period),
            macd,
            macd_signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_full_history() {
        let closes: Vec<f64> = (1..=100).map(|i| 100.0 + (i as f64 % 10.0)).collect();
        let set = IndicatorSet::compute(&closes, &StrategyParams::default());

        assert!(set.ema_short.is_some());
        assert!(set.ema_long.is_some());
        assert!(set.rsi.is_some());
        assert!(set.macd.is_some());
        assert!(set.macd_signal.is_some());
    }

    #[test]
    fn test_compute_short_history_is_partial_not_error() {
        // 15 closes: enough for RSI(14) and EMA(12), not for EMA(26)/MACD
        let closes: Vec<f64> = (1..=15).map(|i| i as f64).collect();
        let set = IndicatorSet::compute(&closes, &StrategyParams::default());

        assert!(set.ema_short.is_some());
        assert!(set.rsi.is_some());
        assert!(set.ema_long.is_none());
        assert!(set.macd.is_none());
        assert!(set.macd_signal.is_none());
    }

    #[test]
    fn test_compute_empty() {
        let set = IndicatorSet::compute(&[], &StrategyParams::default());
        assert_eq!(set, IndicatorSet::default());
    }
}
