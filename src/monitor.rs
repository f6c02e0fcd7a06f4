//! Multi-asset signal monitor.
//!
//! Watches a basket of symbols with one strategy, keeping a per-symbol
//! snapshot slot up to date from a background task per asset. Snapshots can
//! be ranked into trade candidates with side-aware stop and target levels.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::market::{normalize_candles, MarketData};
use crate::strategy::{sma, Strategy, StrategyParams};
use crate::types::{Candle, Side, SignalAction};

const MOMENTUM_PERIOD: usize = 10;

/// Latest reading for one watched symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub symbol: String,
    pub strategy_id: String,
    /// Marker on the most recent candle, if any.
    pub action: Option<SignalAction>,
    pub price: f64,
    pub time: DateTime<Utc>,
    /// Momentum magnitude used for ranking. Deterministic for a given
    /// candle window.
    pub score: f64,
}

/// A snapshot promoted to a trade candidate, with entry, stop, and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSignal {
    pub symbol: String,
    pub strategy_id: String,
    pub action: SignalAction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    /// 1 is the strongest candidate.
    pub rank: usize,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: String,
    pub candle_limit: usize,
    pub poll_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            candle_limit: 100,
            poll_interval_secs: 10,
        }
    }
}

type Slots = Arc<RwLock<HashMap<String, SignalSnapshot>>>;

/// Watches many assets with a single strategy.
pub struct MultiAssetMonitor {
    strategy: Arc<dyn Strategy>,
    params: StrategyParams,
    market: Arc<dyn MarketData>,
    config: MonitorConfig,
    slots: Slots,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MultiAssetMonitor {
    pub fn new(
        strategy: Arc<dyn Strategy>,
        params: StrategyParams,
        market: Arc<dyn MarketData>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            strategy,
            params,
            market,
            config,
            slots: Arc::new(RwLock::new(HashMap::new())),
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    /// Spawn one polling task per symbol. Idempotent only after `stop`.
    pub fn start(&mut self, symbols: &[String]) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        info!(assets = symbols.len(), strategy = %self.strategy.id(), "monitor started");
        for symbol in symbols {
            let task = tokio::spawn(watch_symbol(
                symbol.clone(),
                self.strategy.clone(),
                self.params.clone(),
                self.market.clone(),
                self.config.clone(),
                self.slots.clone(),
                shutdown_rx.clone(),
            ));
            self.tasks.push(task);
        }
    }

    /// Signal every watcher task and wait for them to finish.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        futures::future::join_all(self.tasks.drain(..)).await;
        info!("monitor stopped");
    }

    /// Current snapshots, ordered by symbol.
    pub fn snapshots(&self) -> Vec<SignalSnapshot> {
        let mut snapshots: Vec<SignalSnapshot> = self
            .slots
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshots
    }

    /// Snapshots with an active marker, ranked strongest first and fitted
    /// with stop/target levels `stop_pct`/`target_pct` away from entry.
    pub fn ranked_signals(&self, stop_pct: f64, target_pct: f64) -> Vec<RankedSignal> {
        rank_signals(&self.snapshots(), stop_pct, target_pct)
    }
}

/// Rank active signals by score, strongest first. Ties break by symbol so
/// the ordering is total.
pub fn rank_signals(
    snapshots: &[SignalSnapshot],
    stop_pct: f64,
    target_pct: f64,
) -> Vec<RankedSignal> {
    let mut active: Vec<&SignalSnapshot> =
        snapshots.iter().filter(|s| s.action.is_some()).collect();
    active.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    active
        .into_iter()
        .enumerate()
        .map(|(i, snap)| {
            let action = snap.action.unwrap_or(SignalAction::Up);
            let entry = snap.price;
            let (stop, target) = match action.side() {
                Side::Long => (
                    entry * (1.0 - stop_pct / 100.0),
                    entry * (1.0 + target_pct / 100.0),
                ),
                Side::Short => (
                    entry * (1.0 + stop_pct / 100.0),
                    entry * (1.0 - target_pct / 100.0),
                ),
            };
            RankedSignal {
                symbol: snap.symbol.clone(),
                strategy_id: snap.strategy_id.clone(),
                action,
                entry,
                stop,
                target,
                rank: i + 1,
                note: format!(
                    "{} {} at {:.4}, momentum {:.2}",
                    snap.symbol, action, entry, snap.score
                ),
            }
        })
        .collect()
}

/// Build the snapshot for one symbol from a candle window.
pub fn snapshot_for(
    symbol: &str,
    strategy: &dyn Strategy,
    params: &StrategyParams,
    candles: &[Candle],
) -> Option<SignalSnapshot> {
    let last = candles.last()?;
    let action = strategy
        .calculate(candles, params)
        .ok()
        .and_then(|annotated| annotated.last().and_then(|c| c.marker()));

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let period = MOMENTUM_PERIOD.min(closes.len());
    let mean = sma(&closes, period, closes.len() - 1).unwrap_or(last.close);
    let score = if mean > 0.0 {
        ((last.close - mean) / mean * 100.0).abs()
    } else {
        0.0
    };

    Some(SignalSnapshot {
        symbol: symbol.to_string(),
        strategy_id: strategy.id().to_string(),
        action,
        price: last.close,
        time: last.time,
        score,
    })
}

async fn watch_symbol(
    symbol: String,
    strategy: Arc<dyn Strategy>,
    params: StrategyParams,
    market: Arc<dyn MarketData>,
    config: MonitorConfig,
    slots: Slots,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(config.poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match market
                    .fetch_candles(&symbol, &config.interval, config.candle_limit)
                    .await
                {
                    Ok(candles) => {
                        let candles = normalize_candles(candles);
                        if let Some(snapshot) =
                            snapshot_for(&symbol, strategy.as_ref(), &params, &candles)
                        {
                            debug!(symbol = %symbol, score = snapshot.score, "snapshot updated");
                            if let Ok(mut slots) = slots.write() {
                                slots.insert(symbol.clone(), snapshot);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(symbol = %symbol, error = %err, "monitor fetch failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{candle_at, StaticFeed};
    use crate::strategy::breakout::ChannelBreakout;
    use chrono::TimeZone;
    use tokio::time::timeout;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn flat_series(close: f64) -> Vec<Candle> {
        (0..8)
            .map(|i| candle_at(t(i), close, close + 0.5, close - 0.5, close))
            .collect()
    }

    fn breakout_series(base: f64, last: f64) -> Vec<Candle> {
        let mut candles = flat_series(base);
        candles.push(candle_at(t(8), base, last + 0.5, base, last));
        candles
    }

    fn params() -> StrategyParams {
        StrategyParams::new().set_int("period", 3)
    }

    #[test]
    fn test_snapshot_detects_marker_and_score() {
        let candles = breakout_series(100.0, 103.0);
        let snap = snapshot_for("BTCUSDT", &ChannelBreakout, &params(), &candles).unwrap();
        assert_eq!(snap.action, Some(SignalAction::Up));
        assert!(snap.score > 0.0);

        let quiet = flat_series(100.0);
        let snap = snapshot_for("BTCUSDT", &ChannelBreakout, &params(), &quiet).unwrap();
        assert_eq!(snap.action, None);
    }

    #[test]
    fn test_rank_strongest_first_with_levels() {
        let weak = snapshot_for(
            "ETHUSDT",
            &ChannelBreakout,
            &params(),
            &breakout_series(100.0, 101.0),
        )
        .unwrap();
        let strong = snapshot_for(
            "BTCUSDT",
            &ChannelBreakout,
            &params(),
            &breakout_series(100.0, 106.0),
        )
        .unwrap();
        let quiet = snapshot_for("SOLUSDT", &ChannelBreakout, &params(), &flat_series(50.0))
            .unwrap();

        let ranked = rank_signals(&[weak, strong, quiet], 1.0, 2.0);
        assert_eq!(ranked.len(), 2); // no marker, no candidate
        assert_eq!(ranked[0].symbol, "BTCUSDT");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].symbol, "ETHUSDT");

        // Long levels around entry 106
        let top = &ranked[0];
        assert!((top.stop - 106.0 * 0.99).abs() < 1e-9);
        assert!((top.target - 106.0 * 1.02).abs() < 1e-9);
    }

    #[test]
    fn test_rank_ties_break_by_symbol() {
        let a = snapshot_for(
            "AAAUSDT",
            &ChannelBreakout,
            &params(),
            &breakout_series(100.0, 103.0),
        )
        .unwrap();
        let mut b = a.clone();
        b.symbol = "BBBUSDT".to_string();

        let ranked = rank_signals(&[b, a], 1.0, 2.0);
        assert_eq!(ranked[0].symbol, "AAAUSDT");
        assert_eq!(ranked[1].symbol, "BBBUSDT");
    }

    #[tokio::test]
    async fn test_monitor_populates_slots() {
        let feed = StaticFeed::new()
            .with_series("BTCUSDT", breakout_series(100.0, 103.0))
            .with_series("ETHUSDT", flat_series(50.0));

        let mut monitor = MultiAssetMonitor::new(
            Arc::new(ChannelBreakout),
            params(),
            Arc::new(feed),
            MonitorConfig {
                poll_interval_secs: 1,
                ..MonitorConfig::default()
            },
        );
        monitor.start(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

        timeout(Duration::from_secs(5), async {
            loop {
                if monitor.snapshots().len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("slots never populated");

        monitor.stop().await;

        let ranked = monitor.ranked_signals(1.0, 2.0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].symbol, "BTCUSDT");
    }
}
