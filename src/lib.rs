// Library crate - exports the trading engine, simulators, and shared types

pub mod backtest;
pub mod bot;
pub mod discipline;
pub mod error;
pub mod grid;
pub mod ledger;
pub mod market;
pub mod monitor;
pub mod strategy;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use backtest::{BacktestHarness, BacktestReport};
pub use bot::{BotConfig, BotEngine, BotEvent, BotManager, BotRuntimeState, BotStatus};
pub use discipline::{DisciplineGovernor, DisciplineParams, FailureAction};
pub use error::ConfigError;
pub use grid::{GridConfig, GridDirection, GridMode, GridSimulator};
pub use ledger::{Ledger, Position, Summary, Trade};
pub use market::MarketData;
pub use monitor::{MultiAssetMonitor, RankedSignal};
pub use strategy::{Strategy, StrategyParams, StrategyRegistry};
pub use types::{Candle, CloseReason, Side, SignalAction};
pub use validator::{CreditPool, SignalValidator};
