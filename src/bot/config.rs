//! Bot instance configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discipline::DisciplineParams;
use crate::error::ConfigError;
use crate::strategy::{StrategyParams, StrategyRegistry};

/// Operator-created configuration for one bot instance. Immutable while the
/// instance is running; the manager rejects starting an id twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: String,
    /// Asset symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Candle interval (e.g. "1m", "1h")
    pub interval: String,
    pub capital: f64,
    pub leverage: f64,
    /// Take-profit distance from entry, percent
    pub take_profit_pct: f64,
    /// Stop-loss distance from entry, percent
    pub stop_loss_pct: f64,
    pub strategy_id: String,
    pub params: StrategyParams,
    pub discipline: DisciplineParams,
    /// Contrarian mode: invert every strategy signal
    pub reverse: bool,
    /// Round-trip fee rate per notional (0.001 = 0.1%)
    pub fee_rate: f64,
    /// Candle window fetched each cycle
    pub candle_limit: usize,
    pub poll_interval_secs: u64,
}

impl BotConfig {
    /// Config with a fresh id and conservative defaults.
    pub fn new(symbol: &str, strategy_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            interval: "1m".to_string(),
            capital: 1000.0,
            leverage: 1.0,
            take_profit_pct: 2.0,
            stop_loss_pct: 1.0,
            strategy_id: strategy_id.to_string(),
            params: StrategyParams::new(),
            discipline: DisciplineParams::default(),
            reverse: false,
            fee_rate: 0.001,
            candle_limit: 100,
            poll_interval_secs: 5,
        }
    }

    /// Reject invalid configuration before any state change.
    pub fn validate(&self, registry: &StrategyRegistry) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::MissingSymbol);
        }
        if !registry.contains(&self.strategy_id) {
            return Err(ConfigError::UnknownStrategy(self.strategy_id.clone()));
        }
        if self.capital <= 0.0 {
            return Err(ConfigError::InvalidCapital(self.capital));
        }
        if self.leverage < 1.0 {
            return Err(ConfigError::InvalidLeverage(self.leverage));
        }
        if self.stop_loss_pct <= 0.0 {
            return Err(ConfigError::InvalidStopLoss(self.stop_loss_pct));
        }
        if self.take_profit_pct <= 0.0 {
            return Err(ConfigError::InvalidTakeProfit(self.take_profit_pct));
        }
        if self.candle_limit == 0 {
            return Err(ConfigError::EmptyCandleWindow);
        }
        Ok(())
    }
}
