use thiserror::Error;

/// Errors surfaced by a trading run
///
/// Every variant except `InsufficientHistory` aborts the run with a nonzero
/// exit code. Nothing is written to the plan store after an error.
#[derive(Debug, Error)]
pub enum BotError {
    /// Network, HTTP or exchange-side failure while reading account or market state
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The exchange refused an order
    #[error("order rejected by exchange (code {code}): {message}")]
    OrderRejected { code: String, message: String },

    /// An authenticated endpoint was called on a client built without credentials
    #[error("credentials required for {0}")]
    Unauthenticated(&'static str),

    #[error("insufficient history: {available} candles available, {required} required")]
    InsufficientHistory { required: usize, available: usize },

    #[error("plan store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// An exchange payload did not have the expected shape
    #[error("failed to decode exchange response: {0}")]
    Decode(String),
}

impl BotError {
    /// True for the variant that ends a run without touching the account
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, BotError::InsufficientHistory { .. })
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BotError::Decode(err.to_string())
        } else {
            BotError::Connectivity(err.to_string())
        }
    }
}

impl From<redis::RedisError> for BotError {
    fn from(err: redis::RedisError) -> Self {
        BotError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Decode(err.to_string())
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}
