//! Per-bot decision core.
//!
//! Synchronous trading logic shared by the live polling controller and the
//! backtest harness: exit monitoring, entry sizing, side-aware stop/target
//! placement, and discipline bookkeeping. Everything async (data fetch,
//! validation) lives in the drivers; this core never blocks.

use chrono::{DateTime, Utc};

use super::config::BotConfig;
use crate::discipline::{DisciplineGovernor, DisciplineTrigger, EntryGate};
use crate::ledger::{Ledger, Position, Trade};
use crate::types::{AnnotatedCandle, Candle, CloseReason, Side, SignalAction};

/// A trade closed by the engine, plus any discipline trigger it raised.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub trade: Trade,
    pub trigger: Option<DisciplineTrigger>,
}

/// Synchronous decision core for one bot instance.
#[derive(Debug)]
pub struct BotEngine {
    config: BotConfig,
    ledger: Ledger,
    governor: DisciplineGovernor,
    open_position_id: Option<u64>,
    last_candle_time: Option<DateTime<Utc>>,
}

impl BotEngine {
    pub fn new(config: BotConfig) -> Self {
        let ledger = Ledger::new(config.capital, config.fee_rate);
        let governor = DisciplineGovernor::new(config.discipline.clone(), config.capital);
        Self {
            config,
            ledger,
            governor,
            open_position_id: None,
            last_candle_time: None,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Swap the active strategy after an accepted Adapt recommendation.
    pub fn apply_recommendation(&mut self, strategy_id: &str, params: crate::strategy::StrategyParams) {
        self.config.strategy_id = strategy_id.to_string();
        self.config.params = params;
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn governor(&self) -> &DisciplineGovernor {
        &self.governor
    }

    pub fn governor_mut(&mut self) -> &mut DisciplineGovernor {
        &mut self.governor
    }

    pub fn open_position(&self) -> Option<&Position> {
        self.open_position_id.and_then(|id| self.ledger.position(id))
    }

    pub fn has_open_position(&self) -> bool {
        self.open_position_id.is_some()
    }

    pub fn last_candle_time(&self) -> Option<DateTime<Utc>> {
        self.last_candle_time
    }

    pub fn note_candle(&mut self, time: DateTime<Utc>) {
        self.last_candle_time = Some(time);
    }

    pub fn can_enter(&mut self, now: DateTime<Utc>) -> EntryGate {
        self.governor.can_enter(now)
    }

    /// Most recent strategy marker, with reverse logic applied at this
    /// boundary rather than inside any strategy.
    pub fn entry_signal(&self, annotated: &[AnnotatedCandle]) -> Option<SignalAction> {
        let action = annotated.last()?.marker()?;
        Some(if self.config.reverse {
            action.inverted()
        } else {
            action
        })
    }

    /// Open a position sized by `capital * leverage / entry`, with the
    /// stop below entry for longs and above for shorts.
    pub fn open(
        &mut self,
        action: SignalAction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Position {
        let side = action.side();
        let size = self.config.capital * self.config.leverage / entry_price;
        let sl = self.config.stop_loss_pct / 100.0;
        let tp = self.config.take_profit_pct / 100.0;

        let (stop_loss, take_profit) = match side {
            Side::Long => (entry_price * (1.0 - sl), entry_price * (1.0 + tp)),
            Side::Short => (entry_price * (1.0 + sl), entry_price * (1.0 - tp)),
        };

        let id = self.ledger.open(
            &self.config.symbol,
            side,
            entry_price,
            entry_time,
            size,
            stop_loss,
            take_profit,
            self.config.leverage,
        );
        self.open_position_id = Some(id);

        // Safe: the position was just inserted.
        self.ledger
            .position(id)
            .cloned()
            .unwrap_or_else(|| unreachable!("position {} just opened", id))
    }

    /// Attach validator output to the open position.
    pub fn annotate_open(&mut self, reasoning: String, confidence: f64) {
        if let Some(id) = self.open_position_id {
            self.ledger.annotate(id, reasoning, confidence);
        }
    }

    /// Compare the candle's high/low against the open position's exit
    /// levels and close on a breach. Liquidation outranks the stop when the
    /// margin line sits inside it; the stop is checked before the target
    /// when one candle touches both.
    pub fn manage_position(&mut self, candle: &Candle) -> Option<ClosedTrade> {
        let pos = self.open_position()?.clone();
        let liq = pos.liquidation_price();

        let (exit_price, reason) = match pos.side {
            Side::Long => {
                if candle.low <= liq && liq >= pos.stop_loss {
                    (liq, CloseReason::Liquidation)
                } else if candle.low <= pos.stop_loss {
                    (pos.stop_loss, CloseReason::StopLoss)
                } else if candle.high >= pos.take_profit {
                    (pos.take_profit, CloseReason::TakeProfit)
                } else {
                    return None;
                }
            }
            Side::Short => {
                if candle.high >= liq && liq <= pos.stop_loss {
                    (liq, CloseReason::Liquidation)
                } else if candle.high >= pos.stop_loss {
                    (pos.stop_loss, CloseReason::StopLoss)
                } else if candle.low <= pos.take_profit {
                    (pos.take_profit, CloseReason::TakeProfit)
                } else {
                    return None;
                }
            }
        };

        self.close_open(exit_price, candle.time, reason)
    }

    /// Close the open position at `exit_price` and feed the result into the
    /// discipline governor.
    pub fn close_open(
        &mut self,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: CloseReason,
    ) -> Option<ClosedTrade> {
        let id = self.open_position_id.take()?;
        let trade = self.ledger.close(id, exit_price, exit_time, reason)?;
        let trigger = self.governor.on_trade_closed(&trade, exit_time);
        Some(ClosedTrade { trade, trigger })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::candle_at;
    use chrono::TimeZone;

    const EPS: f64 = 1e-9;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn engine() -> BotEngine {
        let mut config = BotConfig::new("BTCUSDT", "ma_cross");
        config.capital = 1000.0;
        config.leverage = 2.0;
        config.stop_loss_pct = 1.0;
        config.take_profit_pct = 2.0;
        config.fee_rate = 0.0;
        BotEngine::new(config)
    }

    #[test]
    fn test_open_sizing_and_levels() {
        let mut eng = engine();
        let pos = eng.open(SignalAction::Up, 100.0, t(0));

        assert_eq!(pos.side, Side::Long);
        assert!((pos.size - 20.0).abs() < EPS); // 1000 * 2 / 100
        assert!((pos.stop_loss - 99.0).abs() < EPS);
        assert!((pos.take_profit - 102.0).abs() < EPS);

        let mut eng = engine();
        let pos = eng.open(SignalAction::Down, 100.0, t(0));
        assert_eq!(pos.side, Side::Short);
        assert!((pos.stop_loss - 101.0).abs() < EPS);
        assert!((pos.take_profit - 98.0).abs() < EPS);
    }

    #[test]
    fn test_stop_loss_breach_closes_long() {
        let mut eng = engine();
        eng.open(SignalAction::Up, 100.0, t(0));

        // Candle stays inside the bracket: no exit.
        let inside = candle_at(t(1), 100.0, 101.0, 99.5, 100.5);
        assert!(eng.manage_position(&inside).is_none());

        let breach = candle_at(t(2), 100.0, 100.5, 98.5, 99.2);
        let closed = eng.manage_position(&breach).unwrap();
        assert_eq!(closed.trade.reason, CloseReason::StopLoss);
        assert!((closed.trade.exit_price - 99.0).abs() < EPS);
        assert!(!eng.has_open_position());
    }

    #[test]
    fn test_take_profit_breach_closes_short() {
        let mut eng = engine();
        eng.open(SignalAction::Down, 100.0, t(0));

        let breach = candle_at(t(1), 99.0, 99.5, 97.9, 98.2);
        let closed = eng.manage_position(&breach).unwrap();
        assert_eq!(closed.trade.reason, CloseReason::TakeProfit);
        assert!((closed.trade.exit_price - 98.0).abs() < EPS);
        assert!(closed.trade.pnl > 0.0);
    }

    #[test]
    fn test_stop_checked_before_target() {
        // A wide candle touching both exits must close at the stop.
        let mut eng = engine();
        eng.open(SignalAction::Up, 100.0, t(0));

        let wide = candle_at(t(1), 100.0, 103.0, 98.0, 100.0);
        let closed = eng.manage_position(&wide).unwrap();
        assert_eq!(closed.trade.reason, CloseReason::StopLoss);
    }

    #[test]
    fn test_liquidation_outranks_wide_stop() {
        let mut config = BotConfig::new("BTCUSDT", "ma_cross");
        config.capital = 1000.0;
        config.leverage = 10.0; // liquidation 10% from entry
        config.stop_loss_pct = 20.0; // stop far below the margin line
        config.take_profit_pct = 5.0;
        config.fee_rate = 0.0;
        let mut eng = BotEngine::new(config);
        eng.open(SignalAction::Up, 100.0, t(0));

        let crash = candle_at(t(1), 100.0, 100.0, 85.0, 86.0);
        let closed = eng.manage_position(&crash).unwrap();
        assert_eq!(closed.trade.reason, CloseReason::Liquidation);
        assert!((closed.trade.exit_price - 90.0).abs() < EPS);
    }

    #[test]
    fn test_reverse_logic_inverts_marker() {
        let mut config = BotConfig::new("BTCUSDT", "ma_cross");
        config.reverse = true;
        let eng = BotEngine::new(config);

        let mut ac = AnnotatedCandle::plain(candle_at(t(0), 100.0, 101.0, 99.0, 100.0));
        ac.buy_signal = true;
        assert_eq!(eng.entry_signal(&[ac]), Some(SignalAction::Down));
    }

    #[test]
    fn test_losses_reach_governor() {
        let mut eng = engine();
        for i in 0..3u32 {
            eng.open(SignalAction::Up, 100.0, t(i * 3));
            let breach = candle_at(t(i * 3 + 1), 100.0, 100.1, 98.5, 99.0);
            let closed = eng.manage_position(&breach).unwrap();
            if i < 2 {
                assert!(closed.trigger.is_none());
            } else {
                assert!(matches!(
                    closed.trigger,
                    Some(DisciplineTrigger::Cooldown { .. })
                ));
            }
        }
    }
}
