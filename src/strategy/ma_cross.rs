//! Moving-average crossover strategy.

use std::collections::BTreeMap;

use super::{sma, Strategy, StrategyError, StrategyParams};
use crate::types::{AnnotatedCandle, Candle};

/// Buy when the fast SMA crosses above the slow SMA, sell when it crosses
/// below. Parameters: `fast` (default 9), `slow` (default 21).
pub struct MaCrossover;

impl Strategy for MaCrossover {
    fn id(&self) -> &'static str {
        "ma_cross"
    }

    fn name(&self) -> &'static str {
        "MA Crossover"
    }

    fn calculate(
        &self,
        candles: &[Candle],
        params: &StrategyParams,
    ) -> Result<Vec<AnnotatedCandle>, StrategyError> {
        let fast = params.period("fast", 9);
        let slow = params.period("slow", 21);

        if fast >= slow {
            return Err(StrategyError::InvalidParam {
                name: "fast",
                reason: format!("fast period {} must be below slow period {}", fast, slow),
            });
        }
        if candles.len() < slow + 1 {
            return Err(StrategyError::InsufficientData {
                need: slow + 1,
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let mut annotated = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            let mut ac = AnnotatedCandle::plain(*candle);

            if let (Some(f), Some(s)) = (sma(&closes, fast, i), sma(&closes, slow, i)) {
                ac.indicators = BTreeMap::from([
                    ("sma_fast".to_string(), f),
                    ("sma_slow".to_string(), s),
                ]);

                // Marker only on the crossing candle, not while the fast MA
                // merely stays on one side.
                if i > 0 {
                    if let (Some(pf), Some(ps)) =
                        (sma(&closes, fast, i - 1), sma(&closes, slow, i - 1))
                    {
                        ac.buy_signal = pf <= ps && f > s;
                        ac.sell_signal = pf >= ps && f < s;
                    }
                }
            }

            annotated.push(ac);
        }

        Ok(annotated)
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
    fn test_crossover_marks_only_crossing_candle() {
        // Flat, then a sharp rally: fast(2) crosses above slow(4) once.
        let candles = series(&[10.0, 10.0, 10.0, 10.0, 10.0, 14.0, 18.0, 22.0]);
        let params = StrategyParams::new().set_int("fast", 2).set_int("slow", 4);

        let annotated = MaCrossover.calculate(&candles, &params).unwrap();
        let buys: Vec<usize> = annotated
            .iter()
            .enumerate()
            .filter(|(_, a)| a.buy_signal)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(buys, vec![5]);
        assert!(annotated.iter().all(|a| !a.sell_signal));
        assert!(annotated[5].indicators.contains_key("sma_fast"));
    }

    #[test]
    fn test_rejects_bad_periods() {
        let candles = series(&[10.0; 30]);
        let params = StrategyParams::new().set_int("fast", 21).set_int("slow", 9);
        let err = MaCrossover.calculate(&candles, &params).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidParam { .. }));
    }

    #[test]
    fn test_rejects_short_window() {
        let candles = series(&[10.0; 5]);
        let err = MaCrossover
            .calculate(&candles, &StrategyParams::new())
            .unwrap_err();
        assert!(matches!(err, StrategyError::InsufficientData { .. }));
    }
}
