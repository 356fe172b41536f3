//! Candlestick pattern detection
//!
//! Patterns are tried in a fixed order and the first one with a direction
//! wins: engulfing → hammer → inside bar → breakout → momentum candle.
//! Inside bars are recognised but never directional.

use serde::{Deserialize, Serialize};

use crate::types::{Bar, Direction};

const ENGULFING_CONFIDENCE: f64 = 0.8;
const HAMMER_CONFIDENCE: f64 = 0.7;
const BREAKOUT_CONFIDENCE: f64 = 0.75;
const MOMENTUM_CONFIDENCE: f64 = 0.7;

/// Hammer bodies must be below this fraction of the bar range
const HAMMER_MAX_BODY_FRACTION: f64 = 0.3;

/// Pattern detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Shadow / body ratio for hammers (H_RATIO)
    pub hammer_ratio: f64,
    /// Prior bars scanned for breakouts (B_LOOKBACK)
    pub breakout_lookback: usize,
    /// Body / range ratio for momentum candles (M_RATIO)
    pub momentum_ratio: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            hammer_ratio: 2.0,
            breakout_lookback: 5,
            momentum_ratio: 0.7,
        }
    }
}

/// Classified candle shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    None,
    BullishEngulfing,
    BearishEngulfing,
    Hammer,
    InvertedHammer,
    InsideBar,
    Breakout,
    MomentumCandle,
}

impl PatternKind {
    pub fn name(&self) -> &'static str {
        match self {
            PatternKind::None => "None",
            PatternKind::BullishEngulfing => "Bullish Engulfing",
            PatternKind::BearishEngulfing => "Bearish Engulfing",
            PatternKind::Hammer => "Hammer",
            PatternKind::InvertedHammer => "Inverted Hammer",
            PatternKind::InsideBar => "Inside Bar",
            PatternKind::Breakout => "Breakout",
            PatternKind::MomentumCandle => "Momentum Candle",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of pattern detection for one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub kind: PatternKind,
    pub direction: Option<Direction>,
    pub confidence: f64,
}

impl PatternResult {
    pub fn none() -> Self {
        Self::neutral(PatternKind::None)
    }

    fn neutral(kind: PatternKind) -> Self {
        Self {
            kind,
            direction: None,
            confidence: 0.0,
        }
    }

    fn directional(kind: PatternKind, direction: Direction, confidence: f64) -> Self {
        Self {
            kind,
            direction: Some(direction),
            confidence,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_actionable(&self) -> bool {
        self.direction.is_some()
    }
}

/// Stateless pattern detector
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Classify `current`.
    ///
    /// `prior` holds the bars before `current`, oldest first; its last
    /// element is the previous bar. Only the trailing `breakout_lookback`
    /// entries are used for breakouts.
    pub fn detect(&self, current: &Bar, prior: &[&Bar]) -> PatternResult {
        let Some(previous) = prior.last().copied() else {
            return PatternResult::none();
        };

        let engulfing = detect_engulfing(current, previous);
        if engulfing.is_actionable() {
            return engulfing;
        }

        let hammer = self.detect_hammer(current);
        if hammer.is_actionable() {
            return hammer;
        }

        let inside = detect_inside_bar(current, previous);

        let breakout = self.detect_breakout(current, prior);
        if breakout.is_actionable() {
            return breakout;
        }

        let momentum = self.detect_momentum(current);
        if momentum.is_actionable() {
            return momentum;
        }

        inside
    }

    fn detect_hammer(&self, candle: &Bar) -> PatternResult {
        let range = candle.range();
        if range <= 0.0 {
            return PatternResult::none();
        }

        let body = candle.body();
        let small_body = body < range * HAMMER_MAX_BODY_FRACTION;
        let close_in_upper_half = candle.close > (candle.high + candle.low) / 2.0;
        if !small_body || !close_in_upper_half {
            return PatternResult::none();
        }

        if candle.lower_shadow() >= body * self.config.hammer_ratio {
            return PatternResult::directional(PatternKind::Hammer, Direction::Long, HAMMER_CONFIDENCE);
        }
        if candle.upper_shadow() >= body * self.config.hammer_ratio {
            return PatternResult::directional(
                PatternKind::InvertedHammer,
                Direction::Long,
                HAMMER_CONFIDENCE,
            );
        }
        PatternResult::none()
    }

    fn detect_breakout(&self, current: &Bar, prior: &[&Bar]) -> PatternResult {
        let lookback = self.config.breakout_lookback;
        if lookback == 0 || prior.len() < lookback || current.volume <= 0.0 {
            return PatternResult::none();
        }

        let window = &prior[prior.len() - lookback..];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        if current.close > highest {
            PatternResult::directional(PatternKind::Breakout, Direction::Long, BREAKOUT_CONFIDENCE)
        } else if current.close < lowest {
            PatternResult::directional(PatternKind::Breakout, Direction::Short, BREAKOUT_CONFIDENCE)
        } else {
            PatternResult::none()
        }
    }

    fn detect_momentum(&self, candle: &Bar) -> PatternResult {
        let range = candle.range();
        if range <= 0.0 || candle.volume <= 0.0 {
            return PatternResult::none();
        }
        if candle.body() < range * self.config.momentum_ratio {
            return PatternResult::none();
        }

        let direction = if candle.is_bullish() {
            Direction::Long
        } else {
            Direction::Short
        };
        PatternResult::directional(PatternKind::MomentumCandle, direction, MOMENTUM_CONFIDENCE)
    }
}

fn detect_engulfing(current: &Bar, previous: &Bar) -> PatternResult {
    if current.body() <= previous.body() {
        return PatternResult::none();
    }

    if current.is_bullish()
        && previous.is_bearish()
        && current.open < previous.close
        && current.close > previous.open
    {
        return PatternResult::directional(
            PatternKind::BullishEngulfing,
            Direction::Long,
            ENGULFING_CONFIDENCE,
        );
    }

    if current.is_bearish()
        && previous.is_bullish()
        && current.open > previous.close
        && current.close < previous.open
    {
        return PatternResult::directional(
            PatternKind::BearishEngulfing,
            Direction::Short,
            ENGULFING_CONFIDENCE,
        );
    }

    PatternResult::none()
}

fn detect_inside_bar(current: &Bar, previous: &Bar) -> PatternResult {
    if current.high < previous.high && current.low > previous.low {
        PatternResult::neutral(PatternKind::InsideBar)
    } else {
        PatternResult::none()
    }
}
