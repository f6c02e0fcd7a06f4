//! Bot instances: configuration, decision core, live controller, manager.

pub mod config;
pub mod controller;
pub mod engine;
pub mod manager;

pub use config::BotConfig;
pub use controller::{BotCommand, BotEvent, BotRuntimeState, BotStatus, SharedStates};
pub use engine::{BotEngine, ClosedTrade};
pub use manager::BotManager;
