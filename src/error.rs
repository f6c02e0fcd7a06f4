//! Configuration error taxonomy.
//!
//! Configuration errors are rejected synchronously before any state change.
//! Transient and plug-in errors live next to their collaborator traits
//! (`MarketError`, `StrategyError`, `ValidatorError`).

use thiserror::Error;

/// Invalid operator input, rejected before any side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing asset symbol")]
    MissingSymbol,

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("capital must be positive, got {0}")]
    InvalidCapital(f64),

    #[error("leverage must be at least 1, got {0}")]
    InvalidLeverage(f64),

    #[error("stop-loss percent must be positive, got {0}")]
    InvalidStopLoss(f64),

    #[error("take-profit percent must be positive, got {0}")]
    InvalidTakeProfit(f64),

    #[error("candle window must be positive")]
    EmptyCandleWindow,

    #[error("grid bounds must be positive with upper above lower, got {lower}..{upper}")]
    InvalidGridBounds { lower: f64, upper: f64 },

    #[error("grid needs at least 2 levels, got {0}")]
    InvalidGridCount(usize),

    #[error("no bot with id {0}")]
    UnknownBot(String),

    #[error("bot {0} is already running")]
    AlreadyRunning(String),

    #[error("bot {0} is no longer accepting commands")]
    BotStopped(String),
}
