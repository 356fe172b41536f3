//! Signal fusion engine
//!
//! Each closed bar runs pattern → volume → delta → trend and stops at the
//! first filter that fails. The engine owns the per-instrument snapshot
//! and delta histories; nothing is shared between instruments.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::delta::{check_delta, new_delta_history, DeltaConfig, DeltaSample};
use super::history::{BoundedHistory, SNAPSHOT_CAPACITY};
use super::indicators::EMA_LONG_PERIOD;
use super::pattern::{PatternConfig, PatternDetector, PatternResult};
use super::trend::check_trend;
use super::volume::{check_volume, VolumeConfig};
use crate::types::{Bar, MarketSnapshot, Signal};

/// Filter parameters for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub pattern: PatternConfig,
    pub volume: VolumeConfig,
    pub delta: DeltaConfig,
    pub trend_enabled: bool,
    /// Period of the long EMA the trend filter compares against
    pub trend_ema_period: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            pattern: PatternConfig::default(),
            volume: VolumeConfig::default(),
            delta: DeltaConfig::default(),
            trend_enabled: true,
            trend_ema_period: EMA_LONG_PERIOD,
        }
    }
}

/// Why the last cycle produced no entry
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    InsufficientHistory { snapshots: usize },
    NoPattern,
    LowVolume { current: f64, required: f64 },
    WeakDelta { value: f64, threshold: Option<f64> },
    AgainstTrend { close: f64, ema: f64 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InsufficientHistory { snapshots } => {
                write!(f, "insufficient history ({} snapshots)", snapshots)
            }
            Rejection::NoPattern => write!(f, "no directional pattern"),
            Rejection::LowVolume { current, required } => {
                write!(f, "volume {:.2} below required {:.2}", current, required)
            }
            Rejection::WeakDelta {
                value,
                threshold: Some(t),
            } => write!(f, "delta {:.2} does not clear threshold {:.2}", value, t),
            Rejection::WeakDelta {
                threshold: None, ..
            } => write!(f, "not enough delta samples for a dynamic threshold"),
            Rejection::AgainstTrend { close, ema } => {
                write!(f, "close {:.4} on wrong side of EMA {:.4}", close, ema)
            }
        }
    }
}

/// Result of one fusion pass
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub signal: Signal,
    pub pattern: PatternResult,
    pub delta: Option<DeltaSample>,
    pub rejection: Option<Rejection>,
}

impl Evaluation {
    fn rejected(pattern: PatternResult, delta: Option<DeltaSample>, rejection: Rejection) -> Self {
        Self {
            signal: Signal::None,
            pattern,
            delta,
            rejection: Some(rejection),
        }
    }
}

pub struct SignalEngine {
    config: StrategyConfig,
    detector: PatternDetector,
    snapshots: BoundedHistory<MarketSnapshot>,
    deltas: BoundedHistory<DeltaSample>,
    last_rejection: Option<Rejection>,
}

impl SignalEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            detector: PatternDetector::new(config.pattern.clone()),
            config,
            snapshots: BoundedHistory::new(SNAPSHOT_CAPACITY),
            deltas: new_delta_history(),
            last_rejection: None,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Append a closed bar's snapshot and delta sample, then evaluate
    pub fn on_bar(&mut self, snapshot: MarketSnapshot, delta: DeltaSample) -> Evaluation {
        self.snapshots.push(snapshot);
        self.deltas.push(delta);

        let evaluation = self.evaluate();
        if let Some(rejection) = &evaluation.rejection {
            debug!("Fusion rejected: {}", rejection);
        }
        self.last_rejection = evaluation.rejection.clone();
        evaluation
    }

    /// Re-run the filters against the current histories without appending
    pub fn evaluate(&self) -> Evaluation {
        let pattern = self.current_pattern();
        let delta = self.deltas.latest().copied();

        let (Some(current), true) = (self.snapshots.latest(), self.snapshots.len() >= 2) else {
            return Evaluation::rejected(
                PatternResult::none(),
                delta,
                Rejection::InsufficientHistory {
                    snapshots: self.snapshots.len(),
                },
            );
        };

        let Some(direction) = pattern.direction else {
            return Evaluation::rejected(pattern, delta, Rejection::NoPattern);
        };

        let prior = self.prior_bars();
        let volume = check_volume(&self.config.volume, &current.bar, &prior);
        if !volume.passed {
            return Evaluation::rejected(
                pattern,
                delta,
                Rejection::LowVolume {
                    current: volume.current,
                    required: volume.average * self.config.volume.multiplier,
                },
            );
        }

        let Some(sample) = delta else {
            return Evaluation::rejected(
                pattern,
                delta,
                Rejection::WeakDelta {
                    value: 0.0,
                    threshold: None,
                },
            );
        };
        let delta_check = check_delta(&self.config.delta.mode, direction, &sample, &self.deltas);
        if !delta_check.passed {
            return Evaluation::rejected(
                pattern,
                delta,
                Rejection::WeakDelta {
                    value: delta_check.value,
                    threshold: delta_check.threshold,
                },
            );
        }

        if self.config.trend_enabled && !check_trend(current, direction) {
            return Evaluation::rejected(
                pattern,
                delta,
                Rejection::AgainstTrend {
                    close: current.bar.close,
                    ema: current.indicators.ema_long,
                },
            );
        }

        Evaluation {
            signal: Signal::entry(direction),
            pattern,
            delta,
            rejection: None,
        }
    }

    /// Pattern classification of the latest snapshot
    pub fn current_pattern(&self) -> PatternResult {
        match self.snapshots.latest() {
            Some(current) if self.snapshots.len() >= 2 => {
                self.detector.detect(&current.bar, &self.prior_bars())
            }
            _ => PatternResult::none(),
        }
    }

    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.last_rejection.as_ref()
    }

    pub fn snapshots(&self) -> &BoundedHistory<MarketSnapshot> {
        &self.snapshots
    }

    pub fn deltas(&self) -> &BoundedHistory<DeltaSample> {
        &self.deltas
    }

    pub fn latest_snapshot(&self) -> Option<&MarketSnapshot> {
        self.snapshots.latest()
    }

    /// Bars before the latest snapshot, oldest first
    fn prior_bars(&self) -> Vec<&Bar> {
        let len = self.snapshots.len();
        let needed = self
            .config
            .pattern
            .breakout_lookback
            .max(self.config.volume.lookback)
            .max(1);
        let skip = len.saturating_sub(1).saturating_sub(needed);
        self.snapshots
            .iter()
            .take(len.saturating_sub(1))
            .skip(skip)
            .map(|s| &s.bar)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::delta::ThresholdMode;
    use crate::trading_core::pattern::PatternKind;
    use crate::types::test_support::snapshot;
    use crate::types::Direction;

    fn absolute_engine() -> SignalEngine {
        let mut config = StrategyConfig::default();
        config.delta.mode = ThresholdMode::Absolute { threshold: 50.0 };
        SignalEngine::new(config)
    }

    /// Bearish bar then a bullish engulfing bar with high volume and EMA below
    fn feed_engulfing(engine: &mut SignalEngine, delta: f64, ema: f64) -> Evaluation {
        let mut prev = snapshot(0, 10.0, 10.2, 8.9, 9.0, 100.0);
        prev.indicators.ema_long = ema;
        engine.on_bar(prev, DeltaSample::new(0.0, 10.0));

        let mut cur = snapshot(1, 8.5, 11.2, 8.4, 11.0, 200.0);
        cur.indicators.ema_long = ema;
        engine.on_bar(cur, DeltaSample::new(delta, 0.0))
    }

    #[test]
    fn test_single_snapshot_is_insufficient() {
        let mut engine = absolute_engine();
        let eval = engine.on_bar(snapshot(0, 10.0, 11.0, 9.0, 10.5, 1.0), DeltaSample::default());
        assert_eq!(eval.signal, Signal::None);
        assert_eq!(
            engine.last_rejection(),
            Some(&Rejection::InsufficientHistory { snapshots: 1 })
        );
    }

    #[test]
    fn test_long_entry_when_all_filters_pass() {
        let mut engine = absolute_engine();
        let eval = feed_engulfing(&mut engine, 80.0, 10.0);
        assert_eq!(eval.signal, Signal::LongEntry);
        assert_eq!(eval.pattern.kind, PatternKind::BullishEngulfing);
        assert_eq!(eval.pattern.direction, Some(Direction::Long));
        assert!(engine.last_rejection().is_none());
    }

    #[test]
    fn test_weak_delta_rejects() {
        let mut engine = absolute_engine();
        let eval = feed_engulfing(&mut engine, 20.0, 10.0);
        assert_eq!(eval.signal, Signal::None);
        assert!(matches!(
            engine.last_rejection(),
            Some(Rejection::WeakDelta { threshold: Some(_), .. })
        ));
    }

    #[test]
    fn test_trend_filter_rejects_and_can_be_disabled() {
        let mut engine = absolute_engine();
        let eval = feed_engulfing(&mut engine, 80.0, 12.0);
        assert!(matches!(eval.rejection, Some(Rejection::AgainstTrend { .. })));

        let mut config = engine.config().clone();
        config.trend_enabled = false;
        let mut engine = SignalEngine::new(config);
        assert_eq!(feed_engulfing(&mut engine, 80.0, 12.0).signal, Signal::LongEntry);
    }

    #[test]
    fn test_low_volume_rejects() {
        let mut engine = absolute_engine();
        let mut prev = snapshot(0, 10.0, 10.2, 8.9, 9.0, 100.0);
        prev.indicators.ema_long = 10.0;
        engine.on_bar(prev, DeltaSample::default());
        let mut cur = snapshot(1, 8.5, 11.2, 8.4, 11.0, 110.0);
        cur.indicators.ema_long = 10.0;
        let eval = engine.on_bar(cur, DeltaSample::new(80.0, 0.0));
        assert!(matches!(eval.rejection, Some(Rejection::LowVolume { .. })));
    }

    #[test]
    fn test_dynamic_mode_needs_ten_samples() {
        let mut engine = SignalEngine::new(StrategyConfig::default());
        let eval = feed_engulfing(&mut engine, 1000.0, 10.0);
        assert_eq!(
            eval.rejection,
            Some(Rejection::WeakDelta {
                value: 1000.0,
                threshold: None
            })
        );
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let mut engine = absolute_engine();
        let first = feed_engulfing(&mut engine, 80.0, 10.0);
        let again = engine.evaluate();
        let third = engine.evaluate();
        assert_eq!(first, again);
        assert_eq!(again, third);
        assert_eq!(engine.snapshots().len(), 2);
        assert_eq!(engine.deltas().len(), 2);
        assert_eq!(engine.current_pattern(), first.pattern);
    }

    #[test]
    fn test_histories_are_bounded() {
        let mut engine = absolute_engine();
        for i in 0..300 {
            engine.on_bar(
                snapshot(i, 10.0, 10.5, 9.5, 10.0, 1.0),
                DeltaSample::default(),
            );
        }
        assert_eq!(engine.snapshots().len(), 200);
        assert_eq!(engine.deltas().len(), 100);
    }
}
