// Signal generation module
pub mod ema_cross;

pub use ema_cross::EmaCrossSignal;

use crate::models::Candle;
use crate::Result;
use rust_decimal::Decimal;

/// Entry signal and volatility band derived from a candle series
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSnapshot {
    pub long_signal: bool,
    pub short_signal: bool,
    pub volatility_upper: Decimal,
    pub volatility_lower: Decimal,
}

/// Base trait for signal providers
pub trait SignalProvider: Send + Sync {
    /// Evaluate the candle series (oldest first)
    ///
    /// Fails with `BotError::InsufficientHistory` below `min_candles_required`.
    fn evaluate(&self, candles: &[Candle]) -> Result<SignalSnapshot>;

    /// Get provider name
    fn name(&self) -> &str;

    /// Minimum candles required for this provider
    fn min_candles_required(&self) -> usize;
}
