use super::moving_average::ema_series;

/// MACD line and its signal line.
///
/// MACD[i] = EMA(fast)[i] - EMA(slow)[i], defined from input index
/// `slow - 1` onward; the signal line is EMA(`signal`) of the MACD line.
/// Too-short input yields shorter or empty vectors, never an error.
pub fn calculate_macd(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>) {
    if fast == 0 || slow == 0 || fast >= slow || prices.len() < slow {
        return (Vec::new(), Vec::new());
    }

    let fast_series = ema_series(prices, fast); // starts at index fast - 1
    let slow_series = ema_series(prices, slow); // starts at index slow - 1
    let offset = slow - fast;

    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_val)| fast_series[i + offset] - slow_val)
        .collect();

    let signal_line = ema_series(&macd_line, signal);

    (macd_line, signal_line)
}

/// Latest MACD value and signal value, when both exist
pub fn latest_macd(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Option<f64>, Option<f64>) {
    let (macd_line, signal_line) = calculate_macd(prices, fast, slow, signal);
    (macd_line.last().copied(), signal_line.last().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_lengths() {
        let prices: Vec<f64> = (1..=60).map(|i| 100.0 + (i as f64) * 0.5).collect();
        let (macd_line, signal_line) = calculate_macd(&prices, 12, 26, 9);

        // MACD defined from index 25: 60 - 26 + 1 values
        assert_eq!(macd_line.len(), 35);
        // Signal is EMA(9) of the MACD line: 35 - 9 + 1 values
        assert_eq!(signal_line.len(), 27);
    }

    #[test]
    fn test_macd_uptrend_positive() {
        // Steady uptrend: fast EMA sits above slow EMA
        let prices: Vec<f64> = (1..=60).map(|i| 100.0 + (i as f64)).collect();
        let (macd, signal) = latest_macd(&prices, 12, 26, 9);
        assert!(macd.unwrap() > 0.0);
        assert!(signal.unwrap() > 0.0);
    }

    #[test]
    fn test_macd_insufficient_data() {
        let prices = vec![100.0; 20];
        let (macd_line, signal_line) = calculate_macd(&prices, 12, 26, 9);
        assert!(macd_line.is_empty());
        assert!(signal_line.is_empty());

        let (macd, signal) = latest_macd(&prices, 12, 26, 9);
        assert!(macd.is_none());
        assert!(signal.is_none());
    }

    #[test]
    fn test_macd_flat_prices_zero() {
        let prices = vec![100.0; 60];
        let (macd, signal) = latest_macd(&prices, 12, 26, 9);
        assert_eq!(macd, Some(0.0));
        assert_eq!(signal, Some(0.0));
    }
}
