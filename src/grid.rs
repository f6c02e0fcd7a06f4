//! Grid trading simulator.
//!
//! Generates arithmetic or geometric price grids and matches tick crossings
//! against the levels: crossing down into a level opens a lot, crossing up
//! through its paired target closes it (mirrored for short grids). Matched
//! round trips flow through the same ledger arithmetic as bot trades;
//! unmatched lots stay open and are reported separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::ledger::{Ledger, Position, Summary, Trade};
use crate::types::{CloseReason, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridMode {
    Arithmetic,
    Geometric,
}

/// Bias of the grid. Neutral behaves like a long grid: accumulate on the
/// way down, distribute on the way up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridDirection {
    Neutral,
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub symbol: String,
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mode: GridMode,
    pub direction: GridDirection,
    /// Shift the grid one step up when price crosses the trigger.
    pub trailing_up: bool,
    pub trailing_up_trigger: Option<f64>,
    /// Shift the grid one step down when price crosses the trigger.
    pub trailing_down: bool,
    pub trailing_down_trigger: Option<f64>,
    /// Global bound: breaching it force-closes every lot and halts.
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub capital: f64,
    pub leverage: f64,
    pub fee_rate: f64,
    /// Base-asset quantity per lot; derived from capital when absent.
    pub size_per_grid: Option<f64>,
}

impl GridConfig {
    pub fn new(symbol: &str, lower: f64, upper: f64, count: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            lower,
            upper,
            count,
            mode: GridMode::Arithmetic,
            direction: GridDirection::Neutral,
            trailing_up: false,
            trailing_up_trigger: None,
            trailing_down: false,
            trailing_down_trigger: None,
            stop_loss: None,
            take_profit: None,
            capital: 1000.0,
            leverage: 1.0,
            fee_rate: 0.001,
            size_per_grid: None,
        }
    }

    /// Rejected before any level is generated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lower <= 0.0 || self.upper <= self.lower {
            return Err(ConfigError::InvalidGridBounds {
                lower: self.lower,
                upper: self.upper,
            });
        }
        if self.count < 2 {
            return Err(ConfigError::InvalidGridCount(self.count));
        }
        if self.capital <= 0.0 {
            return Err(ConfigError::InvalidCapital(self.capital));
        }
        if self.leverage < 1.0 {
            return Err(ConfigError::InvalidLeverage(self.leverage));
        }
        Ok(())
    }
}

/// Exactly `count` strictly increasing levels with the bounds as endpoints.
pub fn generate_levels(
    lower: f64,
    upper: f64,
    count: usize,
    mode: GridMode,
) -> Result<Vec<f64>, ConfigError> {
    // A zero lower bound breaks geometric spacing and per-lot sizing.
    if lower <= 0.0 || upper <= lower {
        return Err(ConfigError::InvalidGridBounds { lower, upper });
    }
    if count < 2 {
        return Err(ConfigError::InvalidGridCount(count));
    }

    let n = count as f64 - 1.0;
    let mut levels: Vec<f64> = match mode {
        GridMode::Arithmetic => {
            let step = (upper - lower) / n;
            (0..count).map(|i| lower + i as f64 * step).collect()
        }
        GridMode::Geometric => {
            let ratio = (upper / lower).powf(1.0 / n);
            (0..count).map(|i| lower * ratio.powi(i as i32)).collect()
        }
    };
    // Pin the endpoints against accumulated rounding.
    levels[0] = lower;
    levels[count - 1] = upper;
    Ok(levels)
}

#[derive(Debug, Clone)]
struct GridLot {
    level: f64,
    position_id: u64,
    /// Price at which this lot is unwound.
    target: f64,
}

/// Tick-driven grid simulator over one symbol.
#[derive(Debug)]
pub struct GridSimulator {
    config: GridConfig,
    levels: Vec<f64>,
    ledger: Ledger,
    lots: Vec<GridLot>,
    last_price: Option<f64>,
    halted: bool,
}

impl GridSimulator {
    pub fn new(config: GridConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let levels = generate_levels(config.lower, config.upper, config.count, config.mode)?;
        let ledger = Ledger::new(config.capital, config.fee_rate);
        Ok(Self {
            config,
            levels,
            ledger,
            lots: Vec::new(),
            last_price: None,
            halted: false,
        })
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Closed round trips so far.
    pub fn matched_trades(&self) -> &[Trade] {
        self.ledger.trades()
    }

    /// Lots still open (entry without exit).
    pub fn unmatched_lots(&self) -> &[Position] {
        self.ledger.positions()
    }

    pub fn summary(&self) -> Summary {
        self.ledger.summary()
    }

    fn side(&self) -> Side {
        match self.config.direction {
            GridDirection::Short => Side::Short,
            GridDirection::Long | GridDirection::Neutral => Side::Long,
        }
    }

    fn lot_size(&self, level: f64) -> f64 {
        match self.config.size_per_grid {
            Some(size) => size,
            None => {
                let notional = self.config.capital * self.config.leverage / self.config.count as f64;
                notional / level
            }
        }
    }

    /// Feed one price observation. Returns the trades closed by this tick.
    /// The first tick only anchors the reference price.
    pub fn on_price_tick(&mut self, price: f64, time: DateTime<Utc>) -> Vec<Trade> {
        if self.halted {
            return Vec::new();
        }

        let Some(prev) = self.last_price.replace(price) else {
            return Vec::new();
        };

        if let Some(trades) = self.check_global_bounds(price, time) {
            return trades;
        }

        let closed = match self.side() {
            Side::Long => self.tick_long(prev, price, time),
            Side::Short => self.tick_short(prev, price, time),
        };
        self.apply_trailing(price);
        closed
    }

    /// Global stop/take-profit: flatten everything and halt.
    fn check_global_bounds(&mut self, price: f64, time: DateTime<Utc>) -> Option<Vec<Trade>> {
        if let Some(stop) = self.config.stop_loss {
            if price <= stop {
                info!(symbol = %self.config.symbol, price, "grid stop-loss hit, halting");
                return Some(self.flatten(price, time, CloseReason::StopLoss));
            }
        }
        if let Some(target) = self.config.take_profit {
            if price >= target {
                info!(symbol = %self.config.symbol, price, "grid take-profit hit, halting");
                return Some(self.flatten(price, time, CloseReason::TakeProfit));
            }
        }
        None
    }

    fn flatten(&mut self, price: f64, time: DateTime<Utc>, reason: CloseReason) -> Vec<Trade> {
        self.halted = true;
        let mut trades = Vec::new();
        for lot in self.lots.drain(..) {
            if let Some(trade) = self.ledger.close(lot.position_id, price, time, reason) {
                trades.push(trade);
            }
        }
        trades
    }

    fn tick_long(&mut self, prev: f64, price: f64, time: DateTime<Utc>) -> Vec<Trade> {
        let mut closed = Vec::new();

        if price < prev {
            // Downward crossings open a lot per level, paired with the next
            // level up as its exit. The topmost level has no pair.
            for i in 0..self.levels.len() - 1 {
                let level = self.levels[i];
                let occupied = self.lots.iter().any(|l| l.level == level);
                if price <= level && level < prev && !occupied {
                    self.open_lot(level, self.levels[i + 1], Side::Long, time);
                }
            }
        } else if price > prev {
            let mut i = 0;
            while i < self.lots.len() {
                if price >= self.lots[i].target {
                    let lot = self.lots.remove(i);
                    if let Some(trade) =
                        self.ledger
                            .close(lot.position_id, lot.target, time, CloseReason::Signal)
                    {
                        closed.push(trade);
                    }
                } else {
                    i += 1;
                }
            }
        }

        closed
    }

    fn tick_short(&mut self, prev: f64, price: f64, time: DateTime<Utc>) -> Vec<Trade> {
        let mut closed = Vec::new();

        if price > prev {
            // Upward crossings open short lots, paired with the next level
            // down. The bottom level has no pair.
            for i in 1..self.levels.len() {
                let level = self.levels[i];
                let occupied = self.lots.iter().any(|l| l.level == level);
                if price >= level && level > prev && !occupied {
                    self.open_lot(level, self.levels[i - 1], Side::Short, time);
                }
            }
        } else if price < prev {
            let mut i = 0;
            while i < self.lots.len() {
                if price <= self.lots[i].target {
                    let lot = self.lots.remove(i);
                    if let Some(trade) =
                        self.ledger
                            .close(lot.position_id, lot.target, time, CloseReason::Signal)
                    {
                        closed.push(trade);
                    }
                } else {
                    i += 1;
                }
            }
        }

        closed
    }

    fn open_lot(&mut self, level: f64, target: f64, side: Side, time: DateTime<Utc>) {
        let size = self.lot_size(level);
        let position_id = self.ledger.open(
            &self.config.symbol,
            side,
            level,
            time,
            size,
            0.0,
            target,
            self.config.leverage,
        );
        debug!(symbol = %self.config.symbol, level, target, "grid lot opened");
        self.lots.push(GridLot {
            level,
            position_id,
            target,
        });
    }

    /// Shift the grid one step when a trailing trigger is crossed; the
    /// trigger advances by the same step so it re-arms at the new bound.
    /// Existing lots keep the targets they were opened with.
    fn apply_trailing(&mut self, price: f64) {
        if self.config.trailing_up {
            if let Some(trigger) = self.config.trailing_up_trigger {
                if price >= trigger {
                    let (lower, upper) = self.shifted_bounds(true);
                    let step = lower - self.config.lower;
                    self.rebuild(lower, upper);
                    self.config.lower = lower;
                    self.config.upper = upper;
                    self.config.trailing_up_trigger = Some(trigger + step);
                    info!(lower, upper, "grid trailed up");
                }
            }
        }
        if self.config.trailing_down {
            if let Some(trigger) = self.config.trailing_down_trigger {
                if price <= trigger {
                    let (lower, upper) = self.shifted_bounds(false);
                    let step = self.config.lower - lower;
                    self.rebuild(lower, upper);
                    self.config.lower = lower;
                    self.config.upper = upper;
                    self.config.trailing_down_trigger = Some(trigger - step);
                    info!(lower, upper, "grid trailed down");
                }
            }
        }
    }

    fn shifted_bounds(&self, up: bool) -> (f64, f64) {
        match self.config.mode {
            GridMode::Arithmetic => {
                let step = (self.config.upper - self.config.lower) / (self.config.count as f64 - 1.0);
                if up {
                    (self.config.lower + step, self.config.upper + step)
                } else {
                    (self.config.lower - step, self.config.upper - step)
                }
            }
            GridMode::Geometric => {
                let ratio = (self.config.upper / self.config.lower)
                    .powf(1.0 / (self.config.count as f64 - 1.0));
                if up {
                    (self.config.lower * ratio, self.config.upper * ratio)
                } else {
                    (self.config.lower / ratio, self.config.upper / ratio)
                }
            }
        }
    }

    fn rebuild(&mut self, lower: f64, upper: f64) {
        if let Ok(levels) = generate_levels(lower, upper, self.config.count, self.config.mode) {
            self.levels = levels;
        }
    }
}
