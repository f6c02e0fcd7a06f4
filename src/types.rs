//! Shared market and trading types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time of the candle
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional signal produced by a strategy or validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Up,
    Down,
}

impl SignalAction {
    /// The position side this signal opens.
    pub fn side(self) -> Side {
        match self {
            Self::Up => Side::Long,
            Self::Down => Side::Short,
        }
    }

    /// Contrarian inversion for reverse-logic bots.
    pub fn inverted(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Signal,
    Liquidation,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::Signal => write!(f, "SIGNAL"),
            Self::Liquidation => write!(f, "LIQUIDATION"),
        }
    }
}

/// A candle annotated by a strategy with entry markers and indicator values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedCandle {
    pub candle: Candle,
    pub buy_signal: bool,
    pub sell_signal: bool,
    /// Named indicator series values at this candle (e.g. "sma_fast").
    pub indicators: BTreeMap<String, f64>,
}

impl AnnotatedCandle {
    /// Candle with no markers and no indicators.
    pub fn plain(candle: Candle) -> Self {
        Self {
            candle,
            buy_signal: false,
            sell_signal: false,
            indicators: BTreeMap::new(),
        }
    }

    /// The marker on this candle, if any. Buy wins if a strategy sets both.
    pub fn marker(&self) -> Option<SignalAction> {
        if self.buy_signal {
            Some(SignalAction::Up)
        } else if self.sell_signal {
            Some(SignalAction::Down)
        } else {
            None
        }
    }
}
