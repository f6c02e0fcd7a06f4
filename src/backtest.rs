//! Backtest harness.
//!
//! Replays the live controller's decision sequence candle-by-candle over a
//! fixed historical series: manage the open position, gate, signal,
//! validate, open. No timers and no randomness, so the same series and
//! config always produce byte-identical trade logs. A position still open at
//! the end of the series is reported separately, never force-closed into
//! the summary.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bot::{BotConfig, BotEngine};
use crate::discipline::DisciplineTrigger;
use crate::error::ConfigError;
use crate::ledger::{Position, Summary, Trade};
use crate::market::normalize_candles;
use crate::strategy::StrategyRegistry;
use crate::types::Candle;
use crate::validator::{SignalValidator, ValidationContext};

/// Outcome of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub summary: Summary,
    pub trades: Vec<Trade>,
    /// Unmatched exposure at series end, excluded from the summary.
    pub open_position: Option<Position>,
    pub candles_processed: usize,
}

/// Drives [`BotEngine`] over a historical series.
pub struct BacktestHarness {
    registry: Arc<StrategyRegistry>,
    validator: Option<Arc<dyn SignalValidator>>,
}

impl BacktestHarness {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self {
            registry,
            validator: None,
        }
    }

    /// Only deterministic validators belong in a backtest.
    pub fn with_validator(mut self, validator: Arc<dyn SignalValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub async fn run(
        &self,
        series: Vec<Candle>,
        config: BotConfig,
    ) -> Result<BacktestReport, ConfigError> {
        config.validate(&self.registry)?;
        let strategy = self
            .registry
            .get(&config.strategy_id)
            .ok_or_else(|| ConfigError::UnknownStrategy(config.strategy_id.clone()))?;

        let series = normalize_candles(series);
        let candle_limit = config.candle_limit;
        let params = config.params.clone();
        let mut engine = BotEngine::new(config);

        for i in 0..series.len() {
            let start = (i + 1).saturating_sub(candle_limit);
            let window = &series[start..=i];
            let last = &series[i];
            engine.note_candle(last.time);

            if let Some(closed) = engine.manage_position(last) {
                debug!(
                    reason = %closed.trade.reason,
                    pnl = closed.trade.pnl,
                    "backtest trade closed"
                );
                if closed.trigger == Some(DisciplineTrigger::AdaptRequested) {
                    // No operator in a replay: fall back to a plain cooldown.
                    engine.governor_mut().propose(None, last.time);
                }
            }

            if engine.has_open_position() {
                continue;
            }
            if engine.can_enter(last.time) != crate::discipline::EntryGate::Allowed {
                continue;
            }

            let Ok(annotated) = strategy.calculate(window, &params) else {
                continue;
            };
            let Some(action) = engine.entry_signal(&annotated) else {
                continue;
            };

            let prediction = match &self.validator {
                Some(validator) => {
                    let ctx = ValidationContext {
                        symbol: &engine.config().symbol,
                        proposed: action,
                        candles: window,
                    };
                    match validator.predict(&ctx).await {
                        Ok(p) if p.direction == action => Some(p),
                        Ok(_) => continue, // validator disagreed
                        Err(_) => None,    // validator trouble: signal stands
                    }
                }
                None => None,
            };

            engine.open(action, last.close, last.time);
            if let Some(p) = prediction {
                engine.annotate_open(p.reasoning, p.confidence);
            }
        }

        Ok(BacktestReport {
            summary: engine.ledger().summary(),
            trades: engine.ledger().trades().to_vec(),
            open_position: engine.open_position().cloned(),
            candles_processed: series.len(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CsvCandle {
    time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Load a historical series from a CSV file with a
/// `time,open,high,low,close,volume` header. Rows are sorted and deduped by
/// timestamp.
pub fn load_candles_csv(path: &Path) -> anyhow::Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening candle file {}", path.display()))?;

    let mut candles = Vec::new();
    for row in reader.deserialize() {
        let row: CsvCandle = row.context("parsing candle row")?;
        candles.push(Candle {
            time: row.time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(normalize_candles(candles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::candle_at;
    use crate::types::CloseReason;
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn config() -> BotConfig {
        let mut config = BotConfig::new("BTCUSDT", "channel_breakout");
        config.params.insert("period", crate::strategy::ParamValue::Int(3));
        config.fee_rate = 0.0;
        config.stop_loss_pct = 1.0;
        config.take_profit_pct = 2.0;
        config
    }

    /// Flat, then a breakout, then a slide back through the stop.
    fn losing_series() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..6)
            .map(|i| candle_at(t(i), 100.0, 100.5, 99.5, 100.0))
            .collect();
        candles.push(candle_at(t(6), 100.0, 102.0, 100.0, 101.5)); // entry
        candles.push(candle_at(t(7), 101.5, 101.6, 100.0, 100.2)); // stop 100.485
        candles
    }

    #[tokio::test]
    async fn test_entry_and_stop_exit() {
        let harness = BacktestHarness::new(Arc::new(StrategyRegistry::with_builtins()));
        let report = harness.run(losing_series(), config()).await.unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, CloseReason::StopLoss);
        assert!((trade.entry_price - 101.5).abs() < 1e-9);
        assert!((trade.exit_price - 101.5 * 0.99).abs() < 1e-9);
        assert!(trade.pnl < 0.0);
        assert!(report.open_position.is_none());
        assert_eq!(report.candles_processed, 8);
    }

    #[tokio::test]
    async fn test_open_position_reported_separately() {
        let mut series: Vec<Candle> = (0..6)
            .map(|i| candle_at(t(i), 100.0, 100.5, 99.5, 100.0))
            .collect();
        series.push(candle_at(t(6), 100.0, 102.0, 100.0, 101.5)); // entry on last

        let harness = BacktestHarness::new(Arc::new(StrategyRegistry::with_builtins()));
        let report = harness.run(series, config()).await.unwrap();

        assert!(report.trades.is_empty());
        assert_eq!(report.summary.total_trades, 0);
        let open = report.open_position.unwrap();
        assert!((open.entry_price - 101.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_deterministic_across_runs() {
        let harness = BacktestHarness::new(Arc::new(StrategyRegistry::with_builtins()));
        let a = harness.run(losing_series(), config()).await.unwrap();
        let b = harness.run(losing_series(), config()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unsorted_series_is_normalized() {
        let mut series = losing_series();
        series.reverse();

        let harness = BacktestHarness::new(Arc::new(StrategyRegistry::with_builtins()));
        let report = harness.run(series, config()).await.unwrap();
        assert_eq!(report.trades.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let harness = BacktestHarness::new(Arc::new(StrategyRegistry::with_builtins()));
        let mut bad = config();
        bad.strategy_id = "nope".to_string();
        assert!(matches!(
            harness.run(losing_series(), bad).await,
            Err(ConfigError::UnknownStrategy(_))
        ));
    }

    #[tokio::test]
    async fn test_agreeing_validator_annotates_trade() {
        use crate::validator::MomentumValidator;

        let harness = BacktestHarness::new(Arc::new(StrategyRegistry::with_builtins()))
            .with_validator(Arc::new(MomentumValidator::new(3)));
        let report = harness.run(losing_series(), config()).await.unwrap();

        // Breakout above the mean: momentum agrees with the long signal.
        assert_eq!(report.trades.len(), 1);
        assert!(report.trades[0].reasoning.is_some());
        assert!(report.trades[0].confidence.is_some());
    }

    #[test]
    fn test_csv_loading() {
        let dir = std::env::temp_dir().join("tradebot-csv-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("candles.csv");
        std::fs::write(
            &path,
            "time,open,high,low,close,volume\n\
             2024-01-01T00:01:00Z,101.0,102.0,100.0,101.5,10.0\n\
             2024-01-01T00:00:00Z,100.0,101.0,99.0,100.5,12.0\n\
             2024-01-01T00:01:00Z,101.0,102.0,100.0,101.5,10.0\n",
        )
        .unwrap();

        let candles = load_candles_csv(&path).unwrap();
        assert_eq!(candles.len(), 2); // sorted, duplicate dropped
        assert_eq!(candles[0].time, t(0));
        assert_eq!(candles[1].time, t(1));
        assert!((candles[1].close - 101.5).abs() < 1e-9);
    }
}
