//! Discipline governor.
//!
//! Per-bot risk state machine tracking consecutive losses, rolling daily
//! drawdown, and cooldown expiry. It gates new entries and can surface an
//! "Adapt" recommendation; it never swaps strategies on its own. Each bot
//! instance owns one governor, so per-bot serialization comes from the
//! owning task.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::Trade;
use crate::strategy::StrategyParams;

/// What to do when the consecutive-loss limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureAction {
    /// Suspend new entries for the configured period.
    Cooldown,
    /// Surface a strategy recommendation and block entries until the
    /// operator accepts or dismisses it.
    Adapt,
}

/// Operator-configured discipline rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineParams {
    pub enabled: bool,
    pub max_consecutive_losses: u32,
    pub cooldown_minutes: i64,
    /// Daily loss as a percent of initial capital that forces cooldown for
    /// the rest of the trading day.
    pub daily_drawdown_limit_pct: f64,
    pub on_failure: FailureAction,
}

impl Default for DisciplineParams {
    fn default() -> Self {
        Self {
            enabled: true,
            max_consecutive_losses: 3,
            cooldown_minutes: 30,
            daily_drawdown_limit_pct: 10.0,
            on_failure: FailureAction::Cooldown,
        }
    }
}

/// Suggested alternate strategy, pending operator approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub strategy_id: String,
    pub params: StrategyParams,
}

/// Whether a new entry is currently permitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryGate {
    Allowed,
    CoolingDown { until: DateTime<Utc> },
    /// An Adapt recommendation is pending operator action.
    AwaitingAdapt,
}

/// Risk event raised by a closed trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisciplineTrigger {
    /// Consecutive-loss limit hit with the Cooldown action.
    Cooldown { until: DateTime<Utc> },
    /// Daily drawdown floor breached; blocked until end of day.
    DrawdownCooldown { until: DateTime<Utc> },
    /// Consecutive-loss limit hit with the Adapt action; the controller
    /// should compute and propose a recommendation.
    AdaptRequested,
}

/// Per-bot discipline state machine.
#[derive(Debug)]
pub struct DisciplineGovernor {
    params: DisciplineParams,
    initial_capital: f64,
    consecutive_losses: u32,
    cooldown_until: Option<DateTime<Utc>>,
    current_day: Option<NaiveDate>,
    daily_pnl: f64,
    awaiting_adapt: bool,
    recommendation: Option<StrategyRecommendation>,
}

impl DisciplineGovernor {
    pub fn new(params: DisciplineParams, initial_capital: f64) -> Self {
        Self {
            params,
            initial_capital,
            consecutive_losses: 0,
            cooldown_until: None,
            current_day: None,
            daily_pnl: 0.0,
            awaiting_adapt: false,
            recommendation: None,
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn is_awaiting_adapt(&self) -> bool {
        self.awaiting_adapt
    }

    /// Whether a new entry is permitted right now. Expires elapsed cooldowns
    /// and rolls the trading day as a side effect.
    pub fn can_enter(&mut self, now: DateTime<Utc>) -> EntryGate {
        if !self.params.enabled {
            return EntryGate::Allowed;
        }

        self.roll_day(now);

        if self.awaiting_adapt {
            return EntryGate::AwaitingAdapt;
        }

        if let Some(until) = self.cooldown_until {
            if now < until {
                return EntryGate::CoolingDown { until };
            }
            self.cooldown_until = None;
        }

        EntryGate::Allowed
    }

    /// Feed a closed trade into the governor. The drawdown floor takes
    /// priority over the consecutive-loss limit when both fire on the same
    /// trade.
    pub fn on_trade_closed(
        &mut self,
        trade: &Trade,
        now: DateTime<Utc>,
    ) -> Option<DisciplineTrigger> {
        if !self.params.enabled {
            return None;
        }

        self.roll_day(now);
        self.daily_pnl += trade.pnl;

        if trade.pnl > 0.0 {
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
        }

        if self.initial_capital > 0.0 {
            let drawdown_pct = self.daily_pnl / self.initial_capital * 100.0;
            if drawdown_pct <= -self.params.daily_drawdown_limit_pct {
                let until = end_of_day(now, self.params.cooldown_minutes);
                self.cooldown_until = Some(until);
                self.consecutive_losses = 0;
                return Some(DisciplineTrigger::DrawdownCooldown { until });
            }
        }

        if self.consecutive_losses >= self.params.max_consecutive_losses {
            match self.params.on_failure {
                FailureAction::Cooldown => {
                    let until = now + Duration::minutes(self.params.cooldown_minutes);
                    self.cooldown_until = Some(until);
                    self.consecutive_losses = 0;
                    return Some(DisciplineTrigger::Cooldown { until });
                }
                FailureAction::Adapt => {
                    self.awaiting_adapt = true;
                    return Some(DisciplineTrigger::AdaptRequested);
                }
            }
        }

        None
    }

    /// Attach the computed recommendation after an `AdaptRequested` trigger.
    /// Without an alternative the governor falls back to a plain cooldown.
    pub fn propose(&mut self, recommendation: Option<StrategyRecommendation>, now: DateTime<Utc>) {
        if !self.awaiting_adapt {
            return;
        }
        match recommendation {
            Some(rec) => self.recommendation = Some(rec),
            None => {
                self.awaiting_adapt = false;
                self.consecutive_losses = 0;
                self.cooldown_until = Some(now + Duration::minutes(self.params.cooldown_minutes));
            }
        }
    }

    pub fn recommendation(&self) -> Option<&StrategyRecommendation> {
        self.recommendation.as_ref()
    }

    /// Operator accepts the pending recommendation; returns it so the
    /// caller can switch strategies. Resets the loss streak.
    pub fn accept_recommendation(&mut self) -> Option<StrategyRecommendation> {
        let rec = self.recommendation.take();
        if rec.is_some() {
            self.awaiting_adapt = false;
            self.consecutive_losses = 0;
        }
        rec
    }

    /// Operator dismisses the pending recommendation; entries reopen with a
    /// fresh loss streak.
    pub fn dismiss_recommendation(&mut self) {
        self.recommendation = None;
        self.awaiting_adapt = false;
        self.consecutive_losses = 0;
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let day = now.date_naive();
        if self.current_day != Some(day) {
            self.current_day = Some(day);
            self.daily_pnl = 0.0;
            self.consecutive_losses = 0;
        }
    }
}

/// Next midnight after `now`; falls back to a plain cooldown at the end of
/// the calendar range.
fn end_of_day(now: DateTime<Utc>, fallback_minutes: i64) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(now + Duration::minutes(fallback_minutes))
}
