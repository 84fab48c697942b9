// Technical indicators module
// EMA for trend direction, ATR for the volatility band

pub mod atr;
pub mod moving_average;

pub use atr::{calculate_atr_series, volatility_band, VolatilityBand};
pub use moving_average::{calculate_ema_series, calculate_sma};
