/// Calculate Simple Moving Average (SMA) over the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential Moving Average series.
///
/// Seeded with the SMA of the first `period` prices, then smoothed with
/// EMA[i] = EMA[i-1] + a * (price[i] - EMA[i-1]), a = 2 / (period + 1).
///
/// The output starts at input index `period - 1`, so its length is
/// `prices.len() - period + 1`. Too-short input yields an empty series,
/// never an error.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed: f64 = prices[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(prices.len() - period + 1);
    out.push(seed);

    let mut ema = seed;
    for price in &prices[period..] {
        ema += alpha * (price - ema);
        out.push(ema);
    }

    out
}

/// Latest EMA value, or None when there is not enough history
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied()
}
