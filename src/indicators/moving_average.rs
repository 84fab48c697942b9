/// Calculate Simple Moving Average (SMA) of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate the Exponential Moving Average (EMA) for every price from `period - 1` on
///
/// Seeded with the SMA of the first `period` prices. Element `k` of the result
/// belongs to `prices[period - 1 + k]`, so the last element always belongs to
/// the last price. Empty if there is not enough data.
pub fn calculate_ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    let initial_sma = match calculate_sma(&prices[..period.min(prices.len())], period) {
        Some(sma) => sma,
        None => return Vec::new(),
    };

    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    let mut ema = initial_sma;
    series.push(ema);
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
        series.push(ema);
    }

    series
}
