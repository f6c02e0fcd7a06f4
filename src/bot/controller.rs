//! Live bot controller.
//!
//! Owns one [`BotEngine`] and drives it from a polling loop: fetch candles,
//! manage the open position, evaluate entries, and react to operator
//! commands. All state transitions for a bot happen inside its own task, so
//! the engine needs no locking. Shutdown is observed between cycles only; a
//! close that is already in flight always completes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::BotConfig;
use super::engine::BotEngine;
use crate::discipline::{DisciplineTrigger, EntryGate, StrategyRecommendation};
use crate::error::ConfigError;
use crate::ledger::{Position, Summary, Trade};
use crate::market::{MarketData, MarketError};
use crate::strategy::{Strategy, StrategyParams, StrategyRegistry};
use crate::types::{Candle, Side, SignalAction};
use crate::validator::{CreditPool, Prediction, SignalValidator, ValidationContext};

/// Lifecycle state of a bot instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Idle,
    Analyzing,
    Running,
    PositionOpen,
    Cooldown,
    Error,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BotStatus::Idle => "idle",
            BotStatus::Analyzing => "analyzing",
            BotStatus::Running => "running",
            BotStatus::PositionOpen => "position_open",
            BotStatus::Cooldown => "cooldown",
            BotStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of one bot, published after every cycle for dashboards and the
/// manager's status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRuntimeState {
    pub bot_id: String,
    pub symbol: String,
    pub strategy_id: String,
    pub status: BotStatus,
    pub last_candle_time: Option<DateTime<Utc>>,
    pub open_position: Option<Position>,
    pub summary: Summary,
    pub consecutive_losses: u32,
    pub recommendation: Option<StrategyRecommendation>,
    pub last_error: Option<String>,
}

/// Shared state map, keyed by bot id. Written by each bot's task, read by
/// anyone holding the manager.
pub type SharedStates = Arc<RwLock<HashMap<String, BotRuntimeState>>>;

/// Events fanned out to every subscriber over a broadcast channel.
#[derive(Debug, Clone)]
pub enum BotEvent {
    StatusChanged {
        bot_id: String,
        status: BotStatus,
    },
    PositionOpened {
        bot_id: String,
        position: Position,
    },
    TradeClosed {
        bot_id: String,
        trade: Trade,
    },
    /// Strategy signalled but the validator disagreed with the direction.
    SignalRejected {
        bot_id: String,
        proposed: SignalAction,
        prediction: Prediction,
    },
    CooldownStarted {
        bot_id: String,
        until: DateTime<Utc>,
    },
    AdaptRequested {
        bot_id: String,
        recommendation: StrategyRecommendation,
    },
    BotError {
        bot_id: String,
        message: String,
    },
}

/// Operator commands delivered through the bot's command channel.
#[derive(Debug, Clone)]
pub enum BotCommand {
    ManualOpen(Side),
    ManualClose,
    AcceptRecommendation,
    DismissRecommendation,
}

enum Verdict {
    /// Validator agreed (or was unavailable and the strategy signal stands).
    Approved(Option<Prediction>),
    Rejected(Prediction),
}

pub struct BotController {
    engine: BotEngine,
    strategy: Arc<dyn Strategy>,
    registry: Arc<StrategyRegistry>,
    market: Arc<dyn MarketData>,
    validator: Option<Arc<dyn SignalValidator>>,
    credits: Arc<CreditPool>,
    events: broadcast::Sender<BotEvent>,
    states: SharedStates,
    status: BotStatus,
    last_price: Option<f64>,
    last_error: Option<String>,
}

impl BotController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        registry: Arc<StrategyRegistry>,
        market: Arc<dyn MarketData>,
        validator: Option<Arc<dyn SignalValidator>>,
        credits: Arc<CreditPool>,
        events: broadcast::Sender<BotEvent>,
        states: SharedStates,
    ) -> Result<Self, ConfigError> {
        config.validate(&registry)?;
        let strategy = registry
            .get(&config.strategy_id)
            .ok_or_else(|| ConfigError::UnknownStrategy(config.strategy_id.clone()))?;

        Ok(Self {
            engine: BotEngine::new(config),
            strategy,
            registry,
            market,
            validator,
            credits,
            events,
            states,
            status: BotStatus::Idle,
            last_price: None,
            last_error: None,
        })
    }

    pub fn bot_id(&self) -> &str {
        &self.engine.config().id
    }

    /// Polling loop. Returns when `shutdown` flips to true or the command
    /// channel closes. An open position is flattened at the last seen price
    /// before returning.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut commands: mpsc::Receiver<BotCommand>,
    ) {
        let bot_id = self.engine.config().id.clone();
        let poll = Duration::from_secs(self.engine.config().poll_interval_secs.max(1));
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.set_status(BotStatus::Running);
        info!(
            bot_id = %bot_id,
            symbol = %self.engine.config().symbol,
            strategy = %self.engine.config().strategy_id,
            "bot started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                _ = ticker.tick(), if self.status != BotStatus::Error => {
                    self.cycle().await;
                }
            }
        }

        self.flatten(Utc::now());
        self.set_status(BotStatus::Idle);
        info!(bot_id = %bot_id, "bot stopped");
    }

    /// One poll cycle: fetch, manage the open position, evaluate an entry.
    async fn cycle(&mut self) {
        let config = self.engine.config().clone();

        let candles = match self
            .market
            .fetch_candles(&config.symbol, &config.interval, config.candle_limit)
            .await
        {
            Ok(candles) => crate::market::normalize_candles(candles),
            Err(MarketError::UnknownSymbol(symbol)) => {
                self.fail(format!("unknown symbol {}", symbol));
                return;
            }
            Err(err) => {
                // Transient: keep the bot alive and retry next tick.
                warn!(bot_id = %config.id, error = %err, "candle fetch failed");
                return;
            }
        };

        let Some(last) = candles.last().cloned() else {
            warn!(bot_id = %config.id, "empty candle window");
            return;
        };

        let fresh = self.engine.last_candle_time() != Some(last.time);
        self.engine.note_candle(last.time);
        self.last_price = Some(last.close);

        if let Some(closed) = self.engine.manage_position(&last) {
            self.emit(BotEvent::TradeClosed {
                bot_id: config.id.clone(),
                trade: closed.trade.clone(),
            });
            info!(
                bot_id = %config.id,
                reason = %closed.trade.reason,
                pnl = closed.trade.pnl,
                "position closed"
            );
            self.set_status(BotStatus::Running);
            if let Some(trigger) = closed.trigger {
                self.handle_trigger(trigger, last.time);
            }
        }

        if !self.engine.has_open_position() && fresh {
            self.try_enter(&candles, &last).await;
        }

        self.publish_state();
    }

    async fn try_enter(&mut self, candles: &[Candle], last: &Candle) {
        let config = self.engine.config().clone();

        match self.engine.can_enter(last.time) {
            EntryGate::Allowed => {
                // Flat and permitted to trade: the bot is analyzing.
                if matches!(self.status, BotStatus::Running | BotStatus::Cooldown) {
                    self.set_status(BotStatus::Analyzing);
                }
            }
            EntryGate::CoolingDown { until } => {
                if self.status != BotStatus::Cooldown {
                    self.set_status(BotStatus::Cooldown);
                    debug!(bot_id = %config.id, %until, "entry blocked by cooldown");
                }
                return;
            }
            EntryGate::AwaitingAdapt => return,
        }

        let annotated = match self.strategy.calculate(candles, &config.params) {
            Ok(annotated) => annotated,
            Err(err) => {
                // A misbehaving strategy means "no signal", not a dead bot.
                debug!(bot_id = %config.id, error = %err, "strategy produced no signal");
                return;
            }
        };

        let Some(action) = self.engine.entry_signal(&annotated) else {
            return;
        };

        match self.validate(&config.symbol, action, candles).await {
            Verdict::Approved(prediction) => {
                let position = self.engine.open(action, last.close, last.time);
                if let Some(p) = prediction {
                    self.engine.annotate_open(p.reasoning, p.confidence);
                }
                self.emit(BotEvent::PositionOpened {
                    bot_id: config.id.clone(),
                    position: position.clone(),
                });
                info!(
                    bot_id = %config.id,
                    side = %position.side,
                    entry = position.entry_price,
                    "position opened"
                );
                self.set_status(BotStatus::PositionOpen);
            }
            Verdict::Rejected(prediction) => {
                info!(
                    bot_id = %config.id,
                    proposed = %action,
                    predicted = %prediction.direction,
                    "signal rejected by validator"
                );
                self.emit(BotEvent::SignalRejected {
                    bot_id: config.id.clone(),
                    proposed: action,
                    prediction,
                });
            }
        }
    }

    /// Validator trouble (absent, out of credits, errored) degrades to the
    /// strategy signal standing alone.
    async fn validate(&self, symbol: &str, action: SignalAction, candles: &[Candle]) -> Verdict {
        let Some(validator) = &self.validator else {
            return Verdict::Approved(None);
        };
        if !self.credits.try_consume() {
            warn!(symbol, "validation skipped: credit pool exhausted");
            return Verdict::Approved(None);
        }

        let ctx = ValidationContext {
            symbol,
            proposed: action,
            candles,
        };
        match validator.predict(&ctx).await {
            Ok(prediction) if prediction.direction == action => {
                Verdict::Approved(Some(prediction))
            }
            Ok(prediction) => Verdict::Rejected(prediction),
            Err(err) => {
                warn!(symbol, error = %err, "validator failed, trading on strategy signal");
                Verdict::Approved(None)
            }
        }
    }

    fn handle_trigger(&mut self, trigger: DisciplineTrigger, now: DateTime<Utc>) {
        let bot_id = self.engine.config().id.clone();
        match trigger {
            DisciplineTrigger::Cooldown { until }
            | DisciplineTrigger::DrawdownCooldown { until } => {
                warn!(bot_id = %bot_id, %until, "discipline cooldown started");
                self.set_status(BotStatus::Cooldown);
                self.emit(BotEvent::CooldownStarted { bot_id, until });
            }
            DisciplineTrigger::AdaptRequested => {
                let current = self.engine.config().strategy_id.clone();
                let recommendation =
                    self.registry
                        .next_after(&current)
                        .map(|alt| StrategyRecommendation {
                            strategy_id: alt.id().to_string(),
                            params: StrategyParams::new(),
                        });
                self.engine
                    .governor_mut()
                    .propose(recommendation.clone(), now);

                match recommendation {
                    Some(recommendation) => {
                        warn!(
                            bot_id = %bot_id,
                            suggested = %recommendation.strategy_id,
                            "loss streak hit, strategy change recommended"
                        );
                        self.emit(BotEvent::AdaptRequested {
                            bot_id,
                            recommendation,
                        });
                    }
                    None => {
                        // No alternative registered; the governor already
                        // fell back to a plain cooldown.
                        if let EntryGate::CoolingDown { until } = self.engine.can_enter(now) {
                            self.set_status(BotStatus::Cooldown);
                            self.emit(BotEvent::CooldownStarted { bot_id, until });
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: BotCommand) {
        let bot_id = self.engine.config().id.clone();
        match cmd {
            BotCommand::ManualOpen(side) => {
                if self.engine.has_open_position() {
                    warn!(bot_id = %bot_id, "manual open ignored: position already open");
                    return;
                }
                let Some(price) = self.last_price else {
                    warn!(bot_id = %bot_id, "manual open ignored: no price seen yet");
                    return;
                };
                // Operator override: bypasses the discipline gate.
                let action = match side {
                    Side::Long => SignalAction::Up,
                    Side::Short => SignalAction::Down,
                };
                let position = self.engine.open(action, price, Utc::now());
                info!(bot_id = %bot_id, side = %side, entry = price, "manual position opened");
                self.emit(BotEvent::PositionOpened {
                    bot_id,
                    position,
                });
                self.set_status(BotStatus::PositionOpen);
                self.publish_state();
            }
            BotCommand::ManualClose => {
                let Some(price) = self.last_price else {
                    return;
                };
                if let Some(closed) =
                    self.engine
                        .close_open(price, Utc::now(), crate::types::CloseReason::Signal)
                {
                    info!(bot_id = %bot_id, pnl = closed.trade.pnl, "manual close");
                    self.emit(BotEvent::TradeClosed {
                        bot_id,
                        trade: closed.trade,
                    });
                    self.set_status(BotStatus::Running);
                    if let Some(trigger) = closed.trigger {
                        self.handle_trigger(trigger, Utc::now());
                    }
                    self.publish_state();
                }
            }
            BotCommand::AcceptRecommendation => {
                if let Some(rec) = self.engine.governor_mut().accept_recommendation() {
                    if let Some(strategy) = self.registry.get(&rec.strategy_id) {
                        info!(
                            bot_id = %bot_id,
                            from = %self.engine.config().strategy_id,
                            to = %rec.strategy_id,
                            "strategy switched"
                        );
                        self.strategy = strategy;
                        self.engine.apply_recommendation(&rec.strategy_id, rec.params);
                        self.set_status(BotStatus::Running);
                    }
                    self.publish_state();
                }
            }
            BotCommand::DismissRecommendation => {
                self.engine.governor_mut().dismiss_recommendation();
                self.set_status(BotStatus::Running);
                self.publish_state();
            }
        }
    }

    /// Close any open position at the last seen price. Called on shutdown.
    fn flatten(&mut self, now: DateTime<Utc>) {
        let Some(price) = self.last_price else {
            return;
        };
        if let Some(closed) = self
            .engine
            .close_open(price, now, crate::types::CloseReason::Signal)
        {
            let bot_id = self.engine.config().id.clone();
            info!(bot_id = %bot_id, pnl = closed.trade.pnl, "flattened on stop");
            self.emit(BotEvent::TradeClosed {
                bot_id,
                trade: closed.trade,
            });
        }
    }

    fn fail(&mut self, message: String) {
        let bot_id = self.engine.config().id.clone();
        warn!(bot_id = %bot_id, %message, "bot entering error state");
        self.last_error = Some(message.clone());
        self.set_status(BotStatus::Error);
        self.emit(BotEvent::BotError { bot_id, message });
        self.publish_state();
    }

    fn set_status(&mut self, status: BotStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        let bot_id = self.engine.config().id.clone();
        debug!(bot_id = %bot_id, status = %status, "status changed");
        self.emit(BotEvent::StatusChanged { bot_id, status });
        self.publish_state();
    }

    fn publish_state(&self) {
        let config = self.engine.config();
        let state = BotRuntimeState {
            bot_id: config.id.clone(),
            symbol: config.symbol.clone(),
            strategy_id: config.strategy_id.clone(),
            status: self.status,
            last_candle_time: self.engine.last_candle_time(),
            open_position: self.engine.open_position().cloned(),
            summary: self.engine.ledger().summary(),
            consecutive_losses: self.engine.governor().consecutive_losses(),
            recommendation: self.engine.governor().recommendation().cloned(),
            last_error: self.last_error.clone(),
        };
        if let Ok(mut states) = self.states.write() {
            states.insert(config.id.clone(), state);
        }
    }

    fn emit(&self, event: BotEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
