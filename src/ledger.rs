//! Position and PnL ledger.
//!
//! Opens and closes simulated positions, computes fees and realized PnL,
//! and derives summary statistics from the append-only trade log. Summary
//! recomputation is pure: the same trade log always yields the same summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CloseReason, Side};

/// An open position. Destroyed (converted into a [`Trade`]) on exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Quantity of the base asset.
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub leverage: f64,
    /// Validator output carried through to the trade record.
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
}

impl Position {
    /// Mark-to-market PnL at `price`, before fees.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - price) * self.size,
        }
    }

    /// Price at which the margin backing this position is exhausted.
    pub fn liquidation_price(&self) -> f64 {
        let margin_move = self.entry_price / self.leverage.max(1.0);
        match self.side {
            Side::Long => self.entry_price - margin_move,
            Side::Short => self.entry_price + margin_move,
        }
    }
}

/// A completed round trip. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub size: f64,
    pub reason: CloseReason,
    /// PnL before fees.
    pub gross_pnl: f64,
    /// Entry notional plus exit notional, times the fee rate.
    pub fee: f64,
    /// Net PnL after fees.
    pub pnl: f64,
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
}

/// Aggregate statistics derived from the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent of trades with positive net PnL.
    pub win_rate: f64,
    /// Sum of net PnL across all trades.
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// Gross profit over gross loss; infinite when there are no losses.
    pub profit_factor: f64,
    pub avg_win: f64,
    /// Negative number (average losing trade).
    pub avg_loss: f64,
    pub total_fees: f64,
    /// Net PnL relative to initial capital, in percent.
    pub return_pct: f64,
}

/// Ledger of open positions and closed trades for one account.
#[derive(Debug)]
pub struct Ledger {
    initial_capital: f64,
    fee_rate: f64,
    next_id: u64,
    open: Vec<Position>,
    trades: Vec<Trade>,
}

impl Ledger {
    pub fn new(initial_capital: f64, fee_rate: f64) -> Self {
        Self {
            initial_capital,
            fee_rate,
            next_id: 1,
            open: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Open a position and return its id.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        size: f64,
        stop_loss: f64,
        take_profit: f64,
        leverage: f64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.open.push(Position {
            id,
            symbol: symbol.to_string(),
            side,
            entry_price,
            entry_time,
            size,
            stop_loss,
            take_profit,
            leverage,
            reasoning: None,
            confidence: None,
        });
        id
    }

    /// Attach validator output to an open position so it survives into the
    /// trade record.
    pub fn annotate(&mut self, position_id: u64, reasoning: String, confidence: f64) {
        if let Some(pos) = self.open.iter_mut().find(|p| p.id == position_id) {
            pos.reasoning = Some(reasoning);
            pos.confidence = Some(confidence);
        }
    }

    /// Close a position, record the trade, and return it. `None` when the
    /// id does not match an open position.
    pub fn close(
        &mut self,
        position_id: u64,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: CloseReason,
    ) -> Option<Trade> {
        let index = self.open.iter().position(|p| p.id == position_id)?;
        let pos = self.open.remove(index);

        let gross_pnl = pos.unrealized_pnl(exit_price);
        let fee = (pos.entry_price * pos.size + exit_price * pos.size) * self.fee_rate;
        let pnl = gross_pnl - fee;

        let trade = Trade {
            id: pos.id,
            symbol: pos.symbol,
            side: pos.side,
            entry_price: pos.entry_price,
            entry_time: pos.entry_time,
            exit_price,
            exit_time,
            size: pos.size,
            reason,
            gross_pnl,
            fee,
            pnl,
            reasoning: pos.reasoning,
            confidence: pos.confidence,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    pub fn position(&self, id: u64) -> Option<&Position> {
        self.open.iter().find(|p| p.id == id)
    }

    pub fn positions(&self) -> &[Position] {
        &self.open
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Total mark-to-market PnL of all open positions at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.open.iter().map(|p| p.unrealized_pnl(price)).sum()
    }

    /// Recompute the summary from the trade log. Pure and idempotent.
    pub fn summary(&self) -> Summary {
        summarize(&self.trades, self.initial_capital)
    }
}

/// Derive a [`Summary`] from any trade slice.
pub fn summarize(trades: &[Trade], initial_capital: f64) -> Summary {
    let total_trades = trades.len();
    let winning: Vec<&Trade> = trades.iter().filter(|t| t.pnl > 0.0).collect();
    let losing: Vec<&Trade> = trades.iter().filter(|t| t.pnl < 0.0).collect();

    let gross_profit: f64 = winning.iter().map(|t| t.pnl).sum();
    let gross_loss: f64 = losing.iter().map(|t| t.pnl.abs()).sum();
    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let total_fees: f64 = trades.iter().map(|t| t.fee).sum();

    let win_rate = if total_trades > 0 {
        winning.len() as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if winning.is_empty() {
        0.0
    } else {
        gross_profit / winning.len() as f64
    };
    let avg_loss = if losing.is_empty() {
        0.0
    } else {
        -(gross_loss / losing.len() as f64)
    };

    let return_pct = if initial_capital > 0.0 {
        total_pnl / initial_capital * 100.0
    } else {
        0.0
    };

    Summary {
        total_trades,
        winning_trades: winning.len(),
        losing_trades: losing.len(),
        win_rate,
        total_pnl,
        gross_profit,
        gross_loss,
        profit_factor,
        avg_win,
        avg_loss,
        total_fees,
        return_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPS: f64 = 1e-9;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    #[test]
    fn test_long_round_trip_with_fee() {
        // Entry long at 100, size 1, fee 0.1%, exit at 110:
        // gross 10, fee (100 + 110) * 0.001 = 0.21, net 9.79.
        let mut ledger = Ledger::new(1000.0, 0.001);
        let id = ledger.open("BTCUSDT", Side::Long, 100.0, t(0), 1.0, 95.0, 110.0, 1.0);

        let trade = ledger.close(id, 110.0, t(5), CloseReason::TakeProfit).unwrap();
        assert!((trade.gross_pnl - 10.0).abs() < EPS);
        assert!((trade.fee - 0.21).abs() < EPS);
        assert!((trade.pnl - 9.79).abs() < EPS);
        assert!(ledger.positions().is_empty());
    }

    #[test]
    fn test_short_pnl() {
        let mut ledger = Ledger::new(1000.0, 0.0);
        let id = ledger.open("BTCUSDT", Side::Short, 100.0, t(0), 2.0, 105.0, 90.0, 1.0);
        let trade = ledger.close(id, 90.0, t(5), CloseReason::TakeProfit).unwrap();
        assert!((trade.pnl - 20.0).abs() < EPS);
    }

    #[test]
    fn test_close_unknown_id() {
        let mut ledger = Ledger::new(1000.0, 0.001);
        assert!(ledger.close(42, 100.0, t(0), CloseReason::Signal).is_none());
    }

    #[test]
    fn test_summary_totals_match_trade_log() {
        let mut ledger = Ledger::new(1000.0, 0.001);
        for (entry, exit) in [(100.0, 110.0), (110.0, 105.0), (105.0, 115.0)] {
            let id = ledger.open("BTCUSDT", Side::Long, entry, t(0), 1.0, 0.0, 0.0, 1.0);
            ledger.close(id, exit, t(1), CloseReason::Signal);
        }

        let summary = ledger.summary();
        let expected: f64 = ledger.trades().iter().map(|tr| tr.pnl).sum();
        assert!((summary.total_pnl - expected).abs() < EPS);
        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.winning_trades, 2);
        assert_eq!(summary.losing_trades, 1);
        assert!((summary.win_rate - 2.0 / 3.0 * 100.0).abs() < EPS);
        assert!((summary.return_pct - summary.total_pnl / 1000.0 * 100.0).abs() < EPS);
    }

    #[test]
    fn test_summary_idempotent() {
        let mut ledger = Ledger::new(1000.0, 0.001);
        let id = ledger.open("BTCUSDT", Side::Long, 100.0, t(0), 1.0, 0.0, 0.0, 1.0);
        ledger.close(id, 103.0, t(1), CloseReason::Signal);

        assert_eq!(ledger.summary(), ledger.summary());
    }

    #[test]
    fn test_profit_factor_infinite_without_losses() {
        let mut ledger = Ledger::new(1000.0, 0.0);
        let id = ledger.open("BTCUSDT", Side::Long, 100.0, t(0), 1.0, 0.0, 0.0, 1.0);
        ledger.close(id, 110.0, t(1), CloseReason::TakeProfit);

        let summary = ledger.summary();
        assert!(summary.profit_factor.is_infinite());

        // No trades at all: zero, not NaN.
        let empty = Ledger::new(1000.0, 0.0);
        assert_eq!(empty.summary().profit_factor, 0.0);
        assert_eq!(empty.summary().win_rate, 0.0);
    }

    #[test]
    fn test_liquidation_price() {
        let pos = Position {
            id: 1,
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            entry_time: t(0),
            size: 1.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            leverage: 10.0,
            reasoning: None,
            confidence: None,
        };
        assert!((pos.liquidation_price() - 90.0).abs() < EPS);

        let short = Position {
            side: Side::Short,
            ..pos
        };
        assert!((short.liquidation_price() - 110.0).abs() < EPS);
    }
}
