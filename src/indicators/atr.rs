/// Average True Range (ATR) indicator
///
/// Measures market volatility by calculating the average of true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing for the moving average.

use crate::models::Candle;

/// Price envelope around the latest candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityBand {
    pub upper: f64,
    pub lower: f64,
}

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let high = pair[1].high;
            let low = pair[1].low;
            let prev_close = pair[0].close;

            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect()
}

/// Calculate ATR and return all values
///
/// Element `k` of the result belongs to `candles[period + k]`, so the last
/// element belongs to the last candle. Empty if there is not enough data.
pub fn calculate_atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let true_ranges = true_ranges(candles);

    let mut atr_series = Vec::with_capacity(true_ranges.len() - period + 1);

    // First ATR is simple average of first 'period' true ranges
    let first_atr: f64 = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    atr_series.push(first_atr);

    // Apply Wilder's smoothing for subsequent values
    let mut atr = first_atr;
    for tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        atr_series.push(atr);
    }

    atr_series
}

/// ATR band around the latest candle: `high + mult_upper * ATR` / `low - mult_lower * ATR`
pub fn volatility_band(
    candles: &[Candle],
    period: usize,
    mult_upper: f64,
    mult_lower: f64,
) -> Option<VolatilityBand> {
    let atr = *calculate_atr_series(candles, period).last()?;
    let latest = candles.last()?;

    Some(VolatilityBand {
        upper: latest.high + mult_upper * atr,
        lower: latest.low - mult_lower * atr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                instrument: "TEST".to_string(),
                timestamp: Utc::now() + chrono::Duration::minutes(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_low_volatility_atr() {
        let candles = create_test_candles(&vec![(100.0, 101.0, 99.0, 100.0); 15]);
        let atr = calculate_atr_series(&candles, 14);

        assert_eq!(atr.len(), 1);
        // ATR equals the constant high-low range
        assert!((atr[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_high_volatility_atr() {
        let high_vol_prices = vec![
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 110.0, 98.0, 105.0),
            (105.0, 108.0, 92.0, 95.0),
            (95.0, 103.0, 88.0, 100.0),
            (100.0, 115.0, 97.0, 110.0),
            (110.0, 112.0, 95.0, 98.0),
            (98.0, 108.0, 90.0, 105.0),
            (105.0, 120.0, 100.0, 115.0),
            (115.0, 118.0, 105.0, 110.0),
            (110.0, 125.0, 108.0, 120.0),
            (120.0, 130.0, 115.0, 125.0),
            (125.0, 128.0, 110.0, 115.0),
            (115.0, 122.0, 105.0, 118.0),
            (118.0, 130.0, 115.0, 125.0),
            (125.0, 135.0, 120.0, 130.0),
        ];

        let candles = create_test_candles(&high_vol_prices);
        let atr = calculate_atr_series(&candles, 14);

        assert_eq!(atr.len(), 1);
        assert!(atr[0] > 10.0);
    }

    #[test]
    fn test_gap_counts_toward_true_range() {
        // Gap up: previous close 100, bar trades 110-112
        let candles = create_test_candles(&[
            (100.0, 100.0, 100.0, 100.0),
            (110.0, 112.0, 110.0, 111.0),
        ]);
        let atr = calculate_atr_series(&candles, 1);
        assert_eq!(atr, vec![12.0]);
    }

    #[test]
    fn test_first_bar_range_is_not_a_true_range() {
        // The first bar has no previous close and is skipped
        let candles = create_test_candles(&[
            (100.0, 150.0, 50.0, 100.0),
            (100.0, 101.0, 99.0, 100.0),
            (100.0, 101.0, 99.0, 100.0),
        ]);
        assert_eq!(calculate_atr_series(&candles, 2), vec![2.0]);
    }

    #[test]
    fn test_insufficient_data() {
        let candles = create_test_candles(&[
            (100.0, 101.0, 99.0, 100.0),
            (100.0, 101.0, 99.0, 100.0),
        ]);

        assert!(calculate_atr_series(&candles, 14).is_empty());
        assert!(volatility_band(&candles, 14, 3.0, 3.0).is_none());
    }

    #[test]
    fn test_volatility_band_uses_latest_candle() {
        let mut prices = vec![(100.0, 101.0, 99.0, 100.0); 15];
        prices.push((100.0, 102.0, 98.0, 100.0));
        let candles = create_test_candles(&prices);

        let band = volatility_band(&candles, 14, 3.0, 2.0).unwrap();
        let atr = *calculate_atr_series(&candles, 14).last().unwrap();

        assert!((band.upper - (102.0 + 3.0 * atr)).abs() < 1e-9);
        assert!((band.lower - (98.0 - 2.0 * atr)).abs() < 1e-9);
    }
}
