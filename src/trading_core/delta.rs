//! Order-flow delta estimation and threshold check
//!
//! Two estimators share [`DeltaEstimator`]: a candle-shape heuristic for
//! venues without trade data, and a trade-level aggressor sum. Both report
//! delta in base-asset volume, so one threshold configuration works for
//! either.

use std::collections::VecDeque;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::history::{BoundedHistory, DELTA_CAPACITY};
use super::trades::{Side, Trade};
use crate::types::{Bar, Direction};

/// Signed buy/sell imbalance for one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaSample {
    /// buy_volume - sell_volume
    pub value: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

impl DeltaSample {
    pub fn new(buy_volume: f64, sell_volume: f64) -> Self {
        Self {
            value: buy_volume - sell_volume,
            buy_volume,
            sell_volume,
        }
    }
}

/// Produces one delta sample per closed bar
pub trait DeltaEstimator: Send {
    fn sample(&mut self, bar: &Bar) -> DeltaSample;

    /// Whether the orchestrator should feed trades through `record_trade`
    fn wants_trades(&self) -> bool {
        false
    }

    fn record_trade(&mut self, _trade: Trade) {}
}

/// Candle-shape heuristic: split volume by where the close sits in the range
#[derive(Debug, Clone, Default)]
pub struct CandleDeltaEstimator;

impl DeltaEstimator for CandleDeltaEstimator {
    fn sample(&mut self, bar: &Bar) -> DeltaSample {
        let range = bar.range();
        if range <= 0.0 {
            let half = bar.volume * 0.5;
            return DeltaSample::new(half, half);
        }

        let upper = (bar.close - bar.low) / range;
        let heavy = bar.volume * (0.5 + 0.3 * upper);
        let light = bar.volume * (0.5 - 0.3 * upper);
        if bar.close > bar.open {
            DeltaSample::new(heavy, light)
        } else {
            DeltaSample::new(light, heavy)
        }
    }
}

/// Trailing window for trade-level delta
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeltaWindow {
    /// Last `n` trades
    Ticks(usize),
    /// Trades within `s` seconds of the bar close
    Seconds(i64),
}

impl Default for DeltaWindow {
    fn default() -> Self {
        DeltaWindow::Ticks(40)
    }
}

/// Sums aggressor-signed trade size over a trailing window
#[derive(Debug, Clone)]
pub struct TradeDeltaEstimator {
    window: DeltaWindow,
    trades: VecDeque<Trade>,
    max_trades: usize,
}

impl TradeDeltaEstimator {
    pub fn new(window: DeltaWindow) -> Self {
        let max_trades = match window {
            DeltaWindow::Ticks(n) => n.max(1),
            DeltaWindow::Seconds(_) => 10_000,
        };
        Self {
            window,
            trades: VecDeque::with_capacity(max_trades.min(1024)),
            max_trades,
        }
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }
}

impl DeltaEstimator for TradeDeltaEstimator {
    fn sample(&mut self, bar: &Bar) -> DeltaSample {
        let bounds = match self.window {
            DeltaWindow::Ticks(_) => None,
            DeltaWindow::Seconds(s) => Some((bar.end_time - Duration::seconds(s), bar.end_time)),
        };
        let in_window =
            |t: &&Trade| bounds.map_or(true, |(from, to)| t.ts_event > from && t.ts_event <= to);

        let (mut buy, mut sell) = (0.0, 0.0);
        for trade in self.trades.iter().filter(in_window) {
            match trade.aggressor() {
                Some(Side::Buy) => buy += trade.size,
                Some(Side::Sell) => sell += trade.size,
                None => {}
            }
        }
        DeltaSample::new(buy, sell)
    }

    fn wants_trades(&self) -> bool {
        true
    }

    fn record_trade(&mut self, trade: Trade) {
        if self.trades.len() == self.max_trades {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }
}

/// How the delta threshold is derived
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ThresholdMode {
    /// Mean |delta| over the sample history times `multiplier`
    Dynamic { multiplier: f64, min_samples: usize },
    /// Fixed threshold in base-asset volume
    Absolute { threshold: f64 },
}

impl Default for ThresholdMode {
    fn default() -> Self {
        ThresholdMode::Dynamic {
            multiplier: 0.8,
            min_samples: 10,
        }
    }
}

impl ThresholdMode {
    pub fn absolute_default() -> Self {
        ThresholdMode::Absolute { threshold: 100.0 }
    }
}

/// Where per-bar delta comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaSource {
    /// Candle-shape heuristic, no extra requests
    #[default]
    Candle,
    /// Aggressor-signed public trades over [`DeltaConfig::window`]
    Trades,
}

impl std::str::FromStr for DeltaSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "candle" => Ok(DeltaSource::Candle),
            "trades" | "trade" => Ok(DeltaSource::Trades),
            _ => Err(format!("Unknown delta source: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaConfig {
    pub mode: ThresholdMode,
    pub source: DeltaSource,
    /// Only read by the trade source
    pub window: DeltaWindow,
}

impl DeltaConfig {
    pub fn estimator(&self) -> Box<dyn DeltaEstimator> {
        match self.source {
            DeltaSource::Candle => Box::new(CandleDeltaEstimator),
            DeltaSource::Trades => Box::new(TradeDeltaEstimator::new(self.window)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaCheck {
    pub passed: bool,
    pub value: f64,
    /// `None` when the dynamic threshold had too few samples
    pub threshold: Option<f64>,
}

pub fn new_delta_history() -> BoundedHistory<DeltaSample> {
    BoundedHistory::new(DELTA_CAPACITY)
}

/// Check `sample` against the threshold. `history` must already contain it.
pub fn check_delta(
    mode: &ThresholdMode,
    direction: Direction,
    sample: &DeltaSample,
    history: &BoundedHistory<DeltaSample>,
) -> DeltaCheck {
    let threshold = match *mode {
        ThresholdMode::Absolute { threshold } => Some(threshold),
        ThresholdMode::Dynamic {
            multiplier,
            min_samples,
        } => {
            if history.len() < min_samples.max(1) {
                None
            } else {
                let mean = history.iter().map(|s| s.value.abs()).sum::<f64>() / history.len() as f64;
                Some(mean * multiplier)
            }
        }
    };

    let passed = match (threshold, direction) {
        (None, _) => false,
        (Some(t), Direction::Long) => sample.value >= t,
        (Some(t), Direction::Short) => sample.value <= -t,
    };

    DeltaCheck {
        passed,
        value: sample.value,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::bar;
    use chrono::{TimeZone, Utc};

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn history_of(values: &[f64]) -> BoundedHistory<DeltaSample> {
        let mut h = new_delta_history();
        for &v in values {
            h.push(DeltaSample {
                value: v,
                buy_volume: v.max(0.0),
                sell_volume: (-v).max(0.0),
            });
        }
        h
    }

    #[test]
    fn test_candle_heuristic_up_bar() {
        // close at the high: upper = 1.0 -> 80/20 split
        let b = bar(0, 10.0, 11.0, 9.0, 11.0, 100.0);
        let s = CandleDeltaEstimator.sample(&b);
        assert!(close_enough(s.buy_volume, 80.0));
        assert!(close_enough(s.sell_volume, 20.0));
        assert!(close_enough(s.value, 60.0));
    }

    #[test]
    fn test_candle_heuristic_down_bar() {
        // close at the low: upper = 0.0 -> 50/50
        let b = bar(0, 11.0, 11.0, 9.0, 9.0, 100.0);
        let s = CandleDeltaEstimator.sample(&b);
        assert!(close_enough(s.value, 0.0));

        // close mid-range on a red bar: upper = 0.5 -> 35/65
        let b = bar(0, 10.5, 11.0, 9.0, 10.0, 100.0);
        let s = CandleDeltaEstimator.sample(&b);
        assert!(close_enough(s.buy_volume, 35.0));
        assert!(close_enough(s.sell_volume, 65.0));
    }

    #[test]
    fn test_candle_heuristic_zero_range() {
        let b = bar(0, 10.0, 10.0, 10.0, 10.0, 50.0);
        let s = CandleDeltaEstimator.sample(&b);
        assert_eq!(s.value, 0.0);
        assert_eq!(s.buy_volume, 25.0);
    }

    #[test]
    fn test_trade_estimator_tick_window() {
        let mut est = TradeDeltaEstimator::new(DeltaWindow::Ticks(3));
        let ts = Utc.timestamp_opt(1_700_000_030, 0).unwrap();
        for (price, size) in [(101.0, 50.0), (101.0, 5.0), (99.0, 2.0), (100.0, 9.0)] {
            est.record_trade(Trade {
                ts_event: ts,
                price,
                size,
                best_bid: 99.0,
                best_ask: 101.0,
                taker_side: None,
            });
        }
        // first trade evicted, inside-spread print ignored
        assert_eq!(est.trade_count(), 3);
        let s = est.sample(&bar(0, 10.0, 11.0, 9.0, 10.0, 1.0));
        assert_eq!(s.buy_volume, 5.0);
        assert_eq!(s.sell_volume, 2.0);
        assert_eq!(s.value, 3.0);
    }

    #[test]
    fn test_trade_estimator_seconds_window() {
        let b = bar(0, 10.0, 11.0, 9.0, 10.0, 1.0);
        let mut est = TradeDeltaEstimator::new(DeltaWindow::Seconds(30));
        let old = b.end_time - Duration::seconds(45);
        let recent = b.end_time - Duration::seconds(10);
        est.record_trade(Trade::with_taker(old, 101.0, 100.0, Side::Buy));
        est.record_trade(Trade::with_taker(recent, 99.0, 4.0, Side::Sell));
        let s = est.sample(&b);
        assert_eq!(s.value, -4.0);
    }

    #[test]
    fn test_config_builds_estimator_for_source() {
        let mut config = DeltaConfig::default();
        assert!(!config.estimator().wants_trades());

        config.source = DeltaSource::Trades;
        config.window = DeltaWindow::Seconds(30);
        let mut est = config.estimator();
        assert!(est.wants_trades());

        let b = bar(0, 10.0, 11.0, 9.0, 10.0, 1.0);
        est.record_trade(Trade::with_taker(b.end_time - Duration::seconds(40), 10.0, 7.0, Side::Buy));
        est.record_trade(Trade::with_taker(b.end_time - Duration::seconds(5), 10.0, 3.0, Side::Buy));
        // only the print inside the 30s window counts
        assert_eq!(est.sample(&b).value, 3.0);

        assert_eq!("trades".parse::<DeltaSource>().unwrap(), DeltaSource::Trades);
        assert!("book".parse::<DeltaSource>().is_err());
    }

    #[test]
    fn test_dynamic_requires_ten_samples() {
        let mode = ThresholdMode::default();
        let h = history_of(&[50.0; 9]);
        let sample = DeltaSample::new(1000.0, 0.0);
        let check = check_delta(&mode, Direction::Long, &sample, &h);
        assert!(!check.passed);
        assert_eq!(check.threshold, None);
    }

    #[test]
    fn test_dynamic_threshold() {
        let mode = ThresholdMode::default();
        // mean |delta| = 50 -> threshold 40
        let h = history_of(&[50.0, -50.0, 50.0, -50.0, 50.0, -50.0, 50.0, -50.0, 50.0, 50.0]);
        let long = DeltaSample::new(40.0, 0.0);
        let check = check_delta(&mode, Direction::Long, &long, &h);
        assert!(close_enough(check.threshold.unwrap(), 40.0));
        assert!(check.passed);

        assert!(!check_delta(&mode, Direction::Short, &long, &h).passed);
        let short = DeltaSample::new(0.0, 40.0);
        assert!(check_delta(&mode, Direction::Short, &short, &h).passed);
        let weak = DeltaSample::new(0.0, 39.0);
        assert!(!check_delta(&mode, Direction::Short, &weak, &h).passed);
    }

    #[test]
    fn test_absolute_threshold() {
        let mode = ThresholdMode::absolute_default();
        let h = new_delta_history();
        assert!(check_delta(&mode, Direction::Long, &DeltaSample::new(100.0, 0.0), &h).passed);
        assert!(!check_delta(&mode, Direction::Long, &DeltaSample::new(99.0, 0.0), &h).passed);
        assert!(check_delta(&mode, Direction::Short, &DeltaSample::new(0.0, 150.0), &h).passed);
    }
}
