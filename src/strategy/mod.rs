//! Pluggable strategies.
//!
//! A strategy is a pure function over a candle window and a parameter bag,
//! returning the same candles annotated with buy/sell markers and indicator
//! series. Strategies are dispatched by string id through the registry; the
//! engine never knows concrete strategy types.

pub mod breakout;
pub mod ma_cross;
pub mod params;
pub mod rsi_reversal;

use std::sync::Arc;
use thiserror::Error;

pub use params::{ParamValue, StrategyParams};

use crate::types::{AnnotatedCandle, Candle};

/// Failure inside a strategy plug-in. Caught at the controller boundary and
/// treated as "no signal this cycle".
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("not enough candles: need {need}, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },
}

/// A named, pure calculation over a candle window.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;

    /// Annotate the window with buy/sell markers. Must be pure: no hidden
    /// state across calls, re-invoked on every poll with the full window.
    fn calculate(
        &self,
        candles: &[Candle],
        params: &StrategyParams,
    ) -> Result<Vec<AnnotatedCandle>, StrategyError>;
}

/// Ordered registry of strategy implementations, keyed by id.
///
/// Registration order matters: the discipline governor's Adapt heuristic
/// recommends the next strategy in registration order.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registry pre-loaded with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ma_cross::MaCrossover));
        registry.register(Arc::new(rsi_reversal::RsiReversal));
        registry.register(Arc::new(breakout::ChannelBreakout));
        registry
    }

    /// Register a strategy. A later registration with the same id replaces
    /// the earlier one in place.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        if let Some(existing) = self.strategies.iter_mut().find(|s| s.id() == strategy.id()) {
            *existing = strategy;
        } else {
            self.strategies.push(strategy);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.id() == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.iter().any(|s| s.id() == id)
    }

    /// The strategy registered after `id`, wrapping around. Returns `None`
    /// when `id` is unknown or it is the only registration.
    pub fn next_after(&self, id: &str) -> Option<Arc<dyn Strategy>> {
        let pos = self.strategies.iter().position(|s| s.id() == id)?;
        if self.strategies.len() < 2 {
            return None;
        }
        Some(self.strategies[(pos + 1) % self.strategies.len()].clone())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Simple moving average over `period`, `None` until enough data.
pub(crate) fn sma(values: &[f64], period: usize, index: usize) -> Option<f64> {
    if period == 0 || index + 1 < period {
        return None;
    }
    let window = &values[index + 1 - period..=index];
    Some(window.iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_and_order() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.contains("ma_cross"));
        assert!(registry.contains("rsi_reversal"));
        assert!(registry.contains("channel_breakout"));
        assert!(registry.get("nope").is_none());

        let next = registry.next_after("ma_cross").unwrap();
        assert_eq!(next.id(), "rsi_reversal");

        // Wraps around
        let next = registry.next_after("channel_breakout").unwrap();
        assert_eq!(next.id(), "ma_cross");
    }

    #[test]
    fn test_next_after_single_registration() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(ma_cross::MaCrossover));
        assert!(registry.next_after("ma_cross").is_none());
    }

    #[test]
    fn test_sma() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 2, 0), None);
        assert_eq!(sma(&values, 2, 1), Some(1.5));
        assert_eq!(sma(&values, 4, 3), Some(2.5));
    }
}
