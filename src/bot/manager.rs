//! Bot instance manager.
//!
//! Owns every running bot: one tokio task per instance, a shared event
//! channel, and the shared state map. Stopping a bot signals its task and
//! awaits it, so a close already in flight finishes before `stop` returns.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::BotConfig;
use super::controller::{
    BotCommand, BotController, BotEvent, BotRuntimeState, SharedStates,
};
use crate::error::ConfigError;
use crate::market::MarketData;
use crate::strategy::StrategyRegistry;
use crate::types::Side;
use crate::validator::{CreditPool, SignalValidator};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

struct BotHandle {
    config: BotConfig,
    commands: mpsc::Sender<BotCommand>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Creates, supervises, and stops bot instances.
pub struct BotManager {
    registry: Arc<StrategyRegistry>,
    market: Arc<dyn MarketData>,
    validator: Option<Arc<dyn SignalValidator>>,
    credits: Arc<CreditPool>,
    events: broadcast::Sender<BotEvent>,
    states: SharedStates,
    bots: HashMap<String, BotHandle>,
}

impl BotManager {
    pub fn new(registry: Arc<StrategyRegistry>, market: Arc<dyn MarketData>, credits: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            market,
            validator: None,
            credits: Arc::new(CreditPool::new(credits)),
            events,
            states: Arc::new(RwLock::new(HashMap::new())),
            bots: HashMap::new(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SignalValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn credits_remaining(&self) -> u32 {
        self.credits.remaining()
    }

    /// Subscribe to the shared event stream. Every bot publishes here.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    /// Validate the config and spawn the bot's task. Rejects an id that is
    /// already running.
    pub fn start(&mut self, config: BotConfig) -> Result<String, ConfigError> {
        if let Some(handle) = self.bots.get(&config.id) {
            if !handle.task.is_finished() {
                return Err(ConfigError::AlreadyRunning(config.id));
            }
            self.bots.remove(&config.id);
        }

        let controller = BotController::new(
            config.clone(),
            self.registry.clone(),
            self.market.clone(),
            self.validator.clone(),
            self.credits.clone(),
            self.events.clone(),
            self.states.clone(),
        )?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(controller.run(shutdown_rx, command_rx));

        let id = config.id.clone();
        info!(bot_id = %id, symbol = %config.symbol, "bot spawned");
        self.bots.insert(
            id.clone(),
            BotHandle {
                config,
                commands,
                shutdown,
                task,
            },
        );
        Ok(id)
    }

    /// Signal the bot to stop and wait for its task to finish.
    pub async fn stop(&mut self, bot_id: &str) -> Result<(), ConfigError> {
        let handle = self
            .bots
            .remove(bot_id)
            .ok_or_else(|| ConfigError::UnknownBot(bot_id.to_string()))?;

        let _ = handle.shutdown.send(true);
        if let Err(err) = handle.task.await {
            warn!(bot_id = %bot_id, error = %err, "bot task ended abnormally");
        }
        info!(bot_id = %bot_id, "bot stopped");
        Ok(())
    }

    /// Stop every running bot, waiting for each in turn.
    pub async fn stop_all(&mut self) {
        let ids: Vec<String> = self.bots.keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    pub async fn manual_trade(&self, bot_id: &str, side: Side) -> Result<(), ConfigError> {
        self.send(bot_id, BotCommand::ManualOpen(side)).await
    }

    pub async fn manual_close(&self, bot_id: &str) -> Result<(), ConfigError> {
        self.send(bot_id, BotCommand::ManualClose).await
    }

    pub async fn accept_recommendation(&self, bot_id: &str) -> Result<(), ConfigError> {
        self.send(bot_id, BotCommand::AcceptRecommendation).await
    }

    pub async fn dismiss_recommendation(&self, bot_id: &str) -> Result<(), ConfigError> {
        self.send(bot_id, BotCommand::DismissRecommendation).await
    }

    async fn send(&self, bot_id: &str, cmd: BotCommand) -> Result<(), ConfigError> {
        let handle = self
            .bots
            .get(bot_id)
            .ok_or_else(|| ConfigError::UnknownBot(bot_id.to_string()))?;
        handle
            .commands
            .send(cmd)
            .await
            .map_err(|_| ConfigError::BotStopped(bot_id.to_string()))
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.bots
            .iter()
            .filter(|(_, h)| !h.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn config(&self, bot_id: &str) -> Option<&BotConfig> {
        self.bots.get(bot_id).map(|h| &h.config)
    }

    pub fn runtime_state(&self, bot_id: &str) -> Option<BotRuntimeState> {
        self.states.read().ok()?.get(bot_id).cloned()
    }

    pub fn runtime_states(&self) -> Vec<BotRuntimeState> {
        self.states
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }
}
