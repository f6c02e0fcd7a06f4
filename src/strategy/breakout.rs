//! Price-channel breakout strategy.

use std::collections::BTreeMap;

use super::{Strategy, StrategyError, StrategyParams};
use crate::types::{AnnotatedCandle, Candle};

/// Buy when the close breaks above the highest high of the lookback channel,
/// sell when it breaks below the lowest low. Parameter: `period` (default 20).
pub struct ChannelBreakout;

impl Strategy for ChannelBreakout {
    fn id(&self) -> &'static str {
        "channel_breakout"
    }

    fn name(&self) -> &'static str {
        "Channel Breakout"
    }

    fn calculate(
        &self,
        candles: &[Candle],
        params: &StrategyParams,
    ) -> Result<Vec<AnnotatedCandle>, StrategyError> {
        let period = params.period("period", 20);

        if candles.len() < period + 1 {
            return Err(StrategyError::InsufficientData {
                need: period + 1,
                got: candles.len(),
            });
        }

        let mut annotated = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            let mut ac = AnnotatedCandle::plain(*candle);

            if i >= period {
                // Channel over the prior `period` candles, excluding the
                // current one so the breakout candle itself cannot widen it.
                let window = &candles[i - period..i];
                let upper = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
                let lower = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

                ac.indicators = BTreeMap::from([
                    ("channel_upper".to_string(), upper),
                    ("channel_lower".to_string(), lower),
                ]);
                ac.buy_signal = candle.close > upper;
                ac.sell_signal = candle.close < lower;
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

    fn flat_then_spike(period: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut candles: Vec<Candle> = (0..period)
            .map(|i| {
                candle_at(
                    start + Duration::minutes(i as i64),
                    100.0,
                    101.0,
                    99.0,
                    100.0,
                )
            })
            .collect();
        candles.push(candle_at(
            start + Duration::minutes(period as i64),
            100.0,
            105.0,
            100.0,
            104.0,
        ));
        candles
    }

    #[test]
    fn test_upside_breakout() {
        let candles = flat_then_spike(10);
        let params = StrategyParams::new().set_int("period", 10);

        let annotated = ChannelBreakout.calculate(&candles, &params).unwrap();
        let last = annotated.last().unwrap();
        assert!(last.buy_signal);
        assert!(!last.sell_signal);
        assert_eq!(last.indicators["channel_upper"], 101.0);
    }

    #[test]
    fn test_no_marker_inside_channel() {
        let candles = flat_then_spike(10);
        let params = StrategyParams::new().set_int("period", 10);
        let annotated = ChannelBreakout.calculate(&candles, &params).unwrap();
        assert!(annotated[..10].iter().all(|a| a.marker().is_none()));
    }
}
