//! Shared market data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume
    pub volume: f64,
    /// Quote-asset volume
    pub quote_volume: f64,
}

impl Bar {
    /// high >= max(open, close) >= min(open, close) >= low
    pub fn is_valid(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        values.iter().all(|v| v.is_finite())
            && self.high >= self.open.max(self.close)
            && self.open.min(self.close) >= self.low
            && self.volume >= 0.0
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_shadow(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_shadow(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Technical indicators attached to one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    /// Short EMA (8 by default)
    pub ema_short: f64,
    /// Long EMA used by the trend filter (30 by default)
    pub ema_long: f64,
    pub ema_55: f64,
    pub ema_144: f64,
    pub ema_169: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub rsi: f64,
}

/// Bar plus its indicator set. The unit the signal engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bar: Bar,
    pub indicators: Indicators,
}

impl MarketSnapshot {
    pub fn new(bar: Bar, indicators: Indicators) -> Self {
        Self { bar, indicators }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Output of one fusion cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    None,
    LongEntry,
    ShortEntry,
}

impl Signal {
    pub fn entry(direction: Direction) -> Self {
        match direction {
            Direction::Long => Signal::LongEntry,
            Direction::Short => Signal::ShortEntry,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::None => None,
            Signal::LongEntry => Some(Direction::Long),
            Signal::ShortEntry => Some(Direction::Short),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::None => write!(f, "NONE"),
            Signal::LongEntry => write!(f, "LONG ENTRY"),
            Signal::ShortEntry => write!(f, "SHORT ENTRY"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::bar;
    use super::*;

    #[test]
    fn test_bar_validity() {
        assert!(bar(0, 10.0, 11.0, 9.0, 10.5, 100.0).is_valid());
        // high below close
        assert!(!bar(0, 10.0, 10.2, 9.0, 10.5, 100.0).is_valid());
        // low above open
        assert!(!bar(0, 10.0, 11.0, 10.1, 10.5, 100.0).is_valid());
        assert!(!bar(0, 10.0, 11.0, 9.0, f64::NAN, 100.0).is_valid());
    }

    #[test]
    fn test_bar_geometry() {
        let b = bar(0, 10.0, 12.0, 9.0, 11.0, 1.0);
        assert_eq!(b.body(), 1.0);
        assert_eq!(b.range(), 3.0);
        assert_eq!(b.upper_shadow(), 1.0);
        assert_eq!(b.lower_shadow(), 1.0);
        assert!(b.is_bullish());
    }

    #[test]
    fn test_signal_direction() {
        assert_eq!(Signal::entry(Direction::Short), Signal::ShortEntry);
        assert_eq!(Signal::LongEntry.direction(), Some(Direction::Long));
        assert_eq!(Signal::None.direction(), None);
        assert_eq!(Direction::Short.sign(), -1.0);
    }
}
