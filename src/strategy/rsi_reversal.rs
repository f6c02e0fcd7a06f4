//! RSI mean-reversion strategy.

use std::collections::BTreeMap;

use super::{Strategy, StrategyError, StrategyParams};
use crate::types::{AnnotatedCandle, Candle};

/// Buy when RSI crosses up out of the oversold zone, sell when it crosses
/// down out of the overbought zone. Parameters: `period` (default 14),
/// `oversold` (default 30), `overbought` (default 70).
pub struct RsiReversal;

impl Strategy for RsiReversal {
    fn id(&self) -> &'static str {
        "rsi_reversal"
    }

    fn name(&self) -> &'static str {
        "RSI Reversal"
    }

    fn calculate(
        &self,
        candles: &[Candle],
        params: &StrategyParams,
    ) -> Result<Vec<AnnotatedCandle>, StrategyError> {
        let period = params.period("period", 14);
        let oversold = params.float("oversold", 30.0);
        let overbought = params.float("overbought", 70.0);

        if oversold >= overbought {
            return Err(StrategyError::InvalidParam {
                name: "oversold",
                reason: format!(
                    "oversold {} must be below overbought {}",
                    oversold, overbought
                ),
            });
        }
        if candles.len() < period + 2 {
            return Err(StrategyError::InsufficientData {
                need: period + 2,
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi = rsi_series(&closes, period);
        let mut annotated = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            let mut ac = AnnotatedCandle::plain(*candle);

            if let Some(value) = rsi[i] {
                ac.indicators = BTreeMap::from([("rsi".to_string(), value)]);

                if let Some(prev) = i.checked_sub(1).and_then(|p| rsi[p]) {
                    ac.buy_signal = prev <= oversold && value > oversold;
                    ac.sell_signal = prev >= overbought && value < overbought;
                }
            }

            annotated.push(ac);
        }

        Ok(annotated)
    }
}

/// Wilder-smoothed RSI, `None` during warmup.
fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in period + 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta > 0.0 {
            (delta, 0.0)
        } else {
            (0.0, -delta)
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
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
    fn test_rsi_extremes() {
        // Straight rally: RSI pegged at 100.
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi_series(&closes, 14);
        assert_eq!(rsi[13], None);
        assert_eq!(rsi[14], Some(100.0));
        assert_eq!(rsi[19], Some(100.0));
    }

    #[test]
    fn test_buy_on_oversold_recovery() {
        // Sell-off deep into oversold, then a bounce.
        let mut closes: Vec<f64> = (0..15).map(|i| 100.0 - 3.0 * i as f64).collect();
        closes.extend([60.0, 66.0, 72.0]);
        let candles = series(&closes);

        let params = StrategyParams::new().set_int("period", 5);
        let annotated = RsiReversal.calculate(&candles, &params).unwrap();

        assert!(annotated.iter().any(|a| a.buy_signal));
        // The crash itself must not produce buys before the recovery starts.
        let first_buy = annotated.iter().position(|a| a.buy_signal).unwrap();
        assert!(first_buy >= 15);
    }

    #[test]
    fn test_rejects_inverted_zones() {
        let candles = series(&[100.0; 20]);
        let params = StrategyParams::new()
            .set_float("oversold", 70.0)
            .set_float("overbought", 30.0);
        let err = RsiReversal.calculate(&candles, &params).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidParam { .. }));
    }
}
