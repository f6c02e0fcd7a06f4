//! External signal-validation collaborator and AI-credit quota.
//!
//! The validation policy is AND: a validated entry requires the validator's
//! direction to agree with the strategy's. When no validator is configured,
//! the call fails, or the credit pool is exhausted, the strategy signal
//! stands on its own. Validator trouble degrades to no validation, never
//! to a hard failure.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

use crate::strategy::sma;
use crate::types::{Candle, SignalAction};

/// Validator verdict for a proposed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub direction: SignalAction,
    /// 0..1
    pub confidence: f64,
    pub reasoning: String,
}

/// Context handed to the validator: the raw strategy signal plus the recent
/// candle window it was derived from.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    pub symbol: &'a str,
    pub proposed: SignalAction,
    pub candles: &'a [Candle],
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validator unavailable: {0}")]
    Unavailable(String),

    #[error("validator timed out")]
    Timeout,
}

/// External validator collaborator: `predict(context)`.
#[async_trait]
pub trait SignalValidator: Send + Sync {
    async fn predict(&self, ctx: &ValidationContext<'_>) -> Result<Prediction, ValidatorError>;
}

/// Global AI-credit quota shared by every bot instance. One unit is consumed
/// per validator call; exhaustion blocks further calls without crashing.
#[derive(Debug)]
pub struct CreditPool {
    remaining: AtomicU32,
}

impl CreditPool {
    pub fn new(credits: u32) -> Self {
        Self {
            remaining: AtomicU32::new(credits),
        }
    }

    /// Atomically consume one credit. Returns false once the pool is empty.
    pub fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

/// Deterministic validator stub: agrees with the window's momentum (last
/// close versus its SMA). Used by backtests and tests where reproducibility
/// matters more than insight.
pub struct MomentumValidator {
    period: usize,
}

impl MomentumValidator {
    pub fn new(period: usize) -> Self {
        Self { period: period.max(2) }
    }
}

impl Default for MomentumValidator {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl SignalValidator for MomentumValidator {
    async fn predict(&self, ctx: &ValidationContext<'_>) -> Result<Prediction, ValidatorError> {
        let closes: Vec<f64> = ctx.candles.iter().map(|c| c.close).collect();
        let last = *closes
            .last()
            .ok_or_else(|| ValidatorError::Unavailable("empty candle window".to_string()))?;

        let period = self.period.min(closes.len());
        let mean = sma(&closes, period, closes.len() - 1).unwrap_or(last);

        let direction = if last >= mean {
            SignalAction::Up
        } else {
            SignalAction::Down
        };
        let confidence = if mean > 0.0 {
            ((last - mean).abs() / mean * 20.0).clamp(0.05, 1.0)
        } else {
            0.05
        };

        Ok(Prediction {
            direction,
            confidence,
            reasoning: format!(
                "{}: close {:.4} vs {}-candle mean {:.4}",
                ctx.symbol, last, period, mean
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::candle_at;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                candle_at(start + Duration::minutes(i as i64), c, c + 0.5, c - 0.5, c)
            })
            .collect()
    }

    #[test]
    fn test_credit_pool_hard_ceiling() {
        let pool = CreditPool::new(2);
        assert!(pool.try_consume());
        assert!(pool.try_consume());
        assert!(!pool.try_consume());
        assert!(!pool.try_consume());
        assert_eq!(pool.remaining(), 0);
    }

    #[tokio::test]
    async fn test_momentum_validator_direction() {
        let rally = series(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        let ctx = ValidationContext {
            symbol: "BTCUSDT",
            proposed: SignalAction::Up,
            candles: &rally,
        };
        let prediction = MomentumValidator::new(5).predict(&ctx).await.unwrap();
        assert_eq!(prediction.direction, SignalAction::Up);
        assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);

        let selloff = series(&[104.0, 103.0, 102.0, 101.0, 100.0]);
        let ctx = ValidationContext {
            symbol: "BTCUSDT",
            proposed: SignalAction::Up,
            candles: &selloff,
        };
        let prediction = MomentumValidator::new(5).predict(&ctx).await.unwrap();
        assert_eq!(prediction.direction, SignalAction::Down);
    }

    #[tokio::test]
    async fn test_momentum_validator_deterministic() {
        let candles = series(&[100.0, 99.0, 101.0, 102.0, 100.5]);
        let ctx = ValidationContext {
            symbol: "ETHUSDT",
            proposed: SignalAction::Down,
            candles: &candles,
        };
        let validator = MomentumValidator::default();
        let a = validator.predict(&ctx).await.unwrap();
        let b = validator.predict(&ctx).await.unwrap();
        assert_eq!(a, b);
    }
}
