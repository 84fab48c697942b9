use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::BotError;
use crate::models::Timeframe;
use crate::Result;

const DEFAULT_CONFIG_FILE: &str = "perpbot.toml";
const ENV_PREFIX: &str = "PERPBOT";

/// Position sizing and exit parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskParams {
    pub leverage: Decimal,
    pub position_fraction: Decimal,
    pub stop_loss_pct: Decimal,
    pub risk_reward_ratio: Decimal,
    pub tp1_offset: Decimal,
    pub tp2_offset: Decimal,
    pub tp1_fraction: Decimal,
    pub tp2_fraction: Decimal,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            leverage: dec!(25),
            position_fraction: dec!(0.25), // 25% of equity as margin
            stop_loss_pct: dec!(0.02),     // -2% from entry
            risk_reward_ratio: dec!(4),
            tp1_offset: dec!(0.01),
            tp2_offset: dec!(0.02),
            tp1_fraction: dec!(0.25),
            tp2_fraction: dec!(0.5),
        }
    }
}

/// Indicator windows for the EMA-cross / ATR-band signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub atr_mult_upper: f64,
    pub atr_mult_lower: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            ema_fast: 200,
            ema_slow: 300,
            atr_period: 14,
            atr_mult_upper: 3.0,
            atr_mult_lower: 3.0,
        }
    }
}

impl SignalParams {
    /// Candles needed before the signal can be evaluated
    pub fn min_candles_required(&self) -> usize {
        self.ema_slow.max(self.atr_period) + 1
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("state"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub product_type: String,
    pub margin_coin: String,
    pub margin_mode: String,
    pub max_parallel_requests: usize,
    pub requests_per_second: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bitget.com".to_string(),
            product_type: "USDT-FUTURES".to_string(),
            margin_coin: "USDT".to_string(),
            margin_mode: "crossed".to_string(),
            max_parallel_requests: 4,
            requests_per_second: 10,
        }
    }
}

/// Immutable configuration for one trading run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub history_limit: usize,
    pub risk: RiskParams,
    pub signal: SignalParams,
    pub store: StoreConfig,
    pub exchange: ExchangeConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            instrument: "SOLUSDT".to_string(),
            timeframe: Timeframe::M1,
            history_limit: 1000,
            risk: RiskParams::default(),
            signal: SignalParams::default(),
            store: StoreConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration: defaults, then the TOML file, then `PERPBOT__*` env vars
    ///
    /// An explicit `path` must exist. Without one, `perpbot.toml` in the working
    /// directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(Config::try_from(&BotConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BotConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the planner and reconciler cannot work with
    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        let signal = &self.signal;

        if self.instrument.trim().is_empty() {
            return Err(BotError::Config("instrument must not be empty".into()));
        }

        let fractions = [
            ("position_fraction", risk.position_fraction),
            ("tp1_fraction", risk.tp1_fraction),
            ("tp2_fraction", risk.tp2_fraction),
        ];
        for (name, value) in fractions {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(BotError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        let positives = [
            ("leverage", risk.leverage),
            ("stop_loss_pct", risk.stop_loss_pct),
            ("risk_reward_ratio", risk.risk_reward_ratio),
            ("tp1_offset", risk.tp1_offset),
            ("tp2_offset", risk.tp2_offset),
        ];
        for (name, value) in positives {
            if value <= Decimal::ZERO {
                return Err(BotError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if risk.stop_loss_pct >= Decimal::ONE {
            return Err(BotError::Config("stop_loss_pct must be below 1".into()));
        }

        if signal.ema_fast == 0 || signal.atr_period == 0 {
            return Err(BotError::Config("indicator periods must be non-zero".into()));
        }

        if signal.ema_fast >= signal.ema_slow {
            return Err(BotError::Config(format!(
                "ema_fast ({}) must be shorter than ema_slow ({})",
                signal.ema_fast, signal.ema_slow
            )));
        }

        if signal.atr_mult_upper < 0.0 || signal.atr_mult_lower < 0.0 {
            return Err(BotError::Config("ATR multipliers must not be negative".into()));
        }

        let required = signal.min_candles_required();
        if self.history_limit < required {
            return Err(BotError::Config(format!(
                "history_limit ({}) is below the {} candles the signal needs",
                self.history_limit, required
            )));
        }

        if self.exchange.max_parallel_requests == 0 || self.exchange.requests_per_second == 0 {
            return Err(BotError::Config(
                "exchange request limits must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
