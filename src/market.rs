//! Market-data collaborator interface and candle hygiene.
//!
//! The exchange client is an external collaborator; the engine only depends
//! on the [`MarketData`] trait. Feeds are expected to return candles in
//! ascending time order without duplicates, but the engine defensively
//! normalizes every window before use.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::Candle;

/// Transient market-data failure. The polling cycle logs it and retries on
/// the next tick; it never crashes a bot instance.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("feed unavailable: {0}")]
    Unavailable(String),

    #[error("empty candle window for {0}")]
    EmptyWindow(String),
}

/// Candle source shared by every bot instance and the monitor.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError>;
}

/// Sort ascending by time and drop duplicate timestamps, keeping the first
/// occurrence. Applied to every fetched window before any decision runs.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.time);
    candles.dedup_by_key(|c| c.time);
    candles
}

/// Fixed in-memory feed serving pre-loaded candle series. Used by tests and
/// by replay-style flows where the window does not advance on its own.
pub struct StaticFeed {
    series: HashMap<String, Vec<Candle>>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
        }
    }

    pub fn with_series(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.series.insert(symbol.to_string(), candles);
        self
    }

    pub fn insert(&mut self, symbol: &str, candles: Vec<Candle>) {
        self.series.insert(symbol.to_string(), candles);
    }
}

impl Default for StaticFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketData for StaticFeed {
    async fn fetch_candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let candles = self
            .series
            .get(symbol)
            .ok_or_else(|| MarketError::UnknownSymbol(symbol.to_string()))?;

        if candles.is_empty() {
            return Err(MarketError::EmptyWindow(symbol.to_string()));
        }

        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }
}

/// Random-walk feed that appends one candle per fetch. Seeded per symbol so
/// demo runs are repeatable; never used by the backtest harness.
pub struct SyntheticFeed {
    start_price: f64,
    step_pct: f64,
    interval: Duration,
    state: Mutex<HashMap<String, SyntheticSeries>>,
}

struct SyntheticSeries {
    rng: StdRng,
    candles: Vec<Candle>,
    /// Largest window ever requested; history beyond it is dropped.
    retain: usize,
}

impl SyntheticFeed {
    pub fn new(start_price: f64, step_pct: f64) -> Self {
        Self {
            start_price,
            step_pct,
            interval: Duration::minutes(1),
            state: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn history_len(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.get(symbol).map_or(0, |series| series.candles.len()))
            .unwrap_or(0)
    }

    fn next_candle(&self, series: &mut SyntheticSeries) -> Candle {
        let (last_close, last_time) = series
            .candles
            .last()
            .map(|c| (c.close, c.time))
            .unwrap_or((self.start_price, Utc::now() - self.interval));

        let drift: f64 = series.rng.gen_range(-self.step_pct..self.step_pct) / 100.0;
        let close = (last_close * (1.0 + drift)).max(0.01);
        let high = last_close.max(close) * (1.0 + self.step_pct / 400.0);
        let low = last_close.min(close) * (1.0 - self.step_pct / 400.0);

        Candle {
            time: last_time + self.interval,
            open: last_close,
            high,
            low,
            close,
            volume: series.rng.gen_range(10.0..1000.0),
        }
    }
}

#[async_trait]
impl MarketData for SyntheticFeed {
    async fn fetch_candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| MarketError::Unavailable("synthetic feed poisoned".to_string()))?;

        let series = state.entry(symbol.to_string()).or_insert_with(|| {
            let mut hash: u64 = 0xcbf29ce484222325;
            for b in symbol.bytes() {
                hash = (hash ^ b as u64).wrapping_mul(0x100000001b3);
            }
            SyntheticSeries {
                rng: StdRng::seed_from_u64(hash),
                candles: Vec::new(),
                retain: 0,
            }
        });

        let candle = self.next_candle(series);
        series.candles.push(candle);

        // Keep memory bounded on long runs.
        series.retain = series.retain.max(limit.max(1));
        let excess = series.candles.len().saturating_sub(series.retain);
        if excess > 0 {
            series.candles.drain(..excess);
        }

        let start = series.candles.len().saturating_sub(limit);
        Ok(series.candles[start..].to_vec())
    }
}

/// Helper for seeding candle series in tests and demos.
pub fn candle_at(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        time,
        open,
        high,
        low,
        close,
        volume: 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    #[test]
    fn test_normalize_sorts_and_dedupes() {
        let candles = vec![
            candle_at(t(2), 101.0, 102.0, 100.0, 101.5),
            candle_at(t(0), 100.0, 101.0, 99.0, 100.5),
            candle_at(t(2), 999.0, 999.0, 999.0, 999.0), // duplicate timestamp
            candle_at(t(1), 100.5, 101.5, 99.5, 101.0),
        ];

        let normalized = normalize_candles(candles);
        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[0].time, t(0));
        assert_eq!(normalized[1].time, t(1));
        assert_eq!(normalized[2].time, t(2));
        // First occurrence of the duplicate wins
        assert_eq!(normalized[2].close, 101.5);
    }

    #[tokio::test]
    async fn test_static_feed_window() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle_at(t(i), 100.0, 101.0, 99.0, 100.0 + i as f64))
            .collect();
        let feed = StaticFeed::new().with_series("BTCUSDT", candles);

        let window = feed.fetch_candles("BTCUSDT", "1m", 3).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[2].close, 109.0);

        let err = feed.fetch_candles("ETHUSDT", "1m", 3).await.unwrap_err();
        assert!(matches!(err, MarketError::UnknownSymbol(_)));
    }

    #[tokio::test]
    async fn test_synthetic_feed_grows_and_repeats() {
        let feed = SyntheticFeed::new(100.0, 0.5);
        let first = feed.fetch_candles("BTCUSDT", "1m", 50).await.unwrap();
        let second = feed.fetch_candles("BTCUSDT", "1m", 50).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0], first[0]);

        // Same seed for the same symbol in a fresh feed
        let other = SyntheticFeed::new(100.0, 0.5);
        let replay = other.fetch_candles("BTCUSDT", "1m", 50).await.unwrap();
        assert_eq!(replay[0].close, first[0].close);
    }

    #[tokio::test]
    async fn test_synthetic_feed_history_is_bounded() {
        let feed = SyntheticFeed::new(100.0, 0.5);
        for _ in 0..20 {
            let window = feed.fetch_candles("BTCUSDT", "1m", 3).await.unwrap();
            assert!(window.len() <= 3);
        }
        assert_eq!(feed.history_len("BTCUSDT"), 3);

        // A wider request grows the retained window, never shrinks it.
        feed.fetch_candles("BTCUSDT", "1m", 5).await.unwrap();
        feed.fetch_candles("BTCUSDT", "1m", 3).await.unwrap();
        feed.fetch_candles("BTCUSDT", "1m", 3).await.unwrap();
        assert_eq!(feed.history_len("BTCUSDT"), 5);

        // Trimming keeps the walk continuous.
        let window = feed.fetch_candles("BTCUSDT", "1m", 5).await.unwrap();
        for pair in window.windows(2) {
            assert_eq!(pair[1].open, pair[0].close);
        }
    }
}
