use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::{SignalProvider, SignalSnapshot};
use crate::config::SignalParams;
use crate::error::BotError;
use crate::indicators::{calculate_ema_series, volatility_band};
use crate::models::Candle;
use crate::Result;

/// Trend-following entry signal
///
/// - Long when the fast EMA crosses above the slow EMA
/// - Short when the fast EMA crosses below the slow EMA
/// - ATR band around the latest candle sizes the stop
///
/// The cross is read on the last closed candle (second to last in the series)
/// against the candle before it. The last candle is still forming and only
/// contributes the band.
#[derive(Debug, Clone)]
pub struct EmaCrossSignal {
    params: SignalParams,
}

impl EmaCrossSignal {
    pub fn new(params: SignalParams) -> Self {
        Self { params }
    }

    /// EMA value for candle `index`, if the series has warmed up there
    fn value_at(series: &[f64], period: usize, index: usize) -> Option<f64> {
        if index + 1 < period {
            return None;
        }
        series.get(index + 1 - period).copied()
    }

    fn to_decimal(value: f64) -> Result<Decimal> {
        Decimal::from_f64(value)
            .ok_or_else(|| BotError::Decode(format!("indicator value {} is not finite", value)))
    }
}

impl Default for EmaCrossSignal {
    fn default() -> Self {
        Self::new(SignalParams::default())
    }
}

impl SignalProvider for EmaCrossSignal {
    fn evaluate(&self, candles: &[Candle]) -> Result<SignalSnapshot> {
        let required = self.min_candles_required();
        if candles.len() < required {
            return Err(BotError::InsufficientHistory {
                required,
                available: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = calculate_ema_series(&closes, self.params.ema_fast);
        let slow = calculate_ema_series(&closes, self.params.ema_slow);

        let current = candles.len() - 2;
        let previous = current - 1;

        let pair = |index: usize| {
            Some((
                Self::value_at(&fast, self.params.ema_fast, index)?,
                Self::value_at(&slow, self.params.ema_slow, index)?,
            ))
        };

        let (long_signal, short_signal) = match (pair(previous), pair(current)) {
            (Some((prev_fast, prev_slow)), Some((fast_now, slow_now))) => (
                fast_now > slow_now && prev_fast <= prev_slow,
                fast_now < slow_now && prev_fast >= prev_slow,
            ),
            _ => (false, false),
        };

        let band = volatility_band(
            candles,
            self.params.atr_period,
            self.params.atr_mult_upper,
            self.params.atr_mult_lower,
        )
        .ok_or(BotError::InsufficientHistory {
            required,
            available: candles.len(),
        })?;

        tracing::debug!(
            long_signal,
            short_signal,
            upper = band.upper,
            lower = band.lower,
            "Evaluated EMA cross"
        );

        Ok(SignalSnapshot {
            long_signal,
            short_signal,
            volatility_upper: Self::to_decimal(band.upper)?,
            volatility_lower: Self::to_decimal(band.lower)?,
        })
    }

    fn name(&self) -> &str {
        "EmaCrossSignal"
    }

    fn min_candles_required(&self) -> usize {
        // Longest window plus the bar before the cross; never fewer than the three
        // candles needed for previous / closed / forming
        self.params.min_candles_required().max(3)
    }
}
