//! Trend filter: trade only on the side of the long EMA

use crate::types::{Direction, MarketSnapshot};

/// Long requires close above the long EMA, short requires close below.
/// A missing (zero) or non-finite EMA never passes.
pub fn check_trend(snapshot: &MarketSnapshot, direction: Direction) -> bool {
    let ema = snapshot.indicators.ema_long;
    if !ema.is_finite() || ema <= 0.0 {
        return false;
    }
    match direction {
        Direction::Long => snapshot.bar.close > ema,
        Direction::Short => snapshot.bar.close < ema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::snapshot;

    #[test]
    fn test_trend_alignment() {
        let mut snap = snapshot(0, 10.0, 10.6, 9.9, 10.5, 1.0);
        snap.indicators.ema_long = 10.2;
        assert!(check_trend(&snap, Direction::Long));
        assert!(!check_trend(&snap, Direction::Short));

        snap.bar.close = 10.0;
        assert!(check_trend(&snap, Direction::Short));
        // equal to EMA passes neither side
        snap.bar.close = 10.2;
        assert!(!check_trend(&snap, Direction::Long));
        assert!(!check_trend(&snap, Direction::Short));
    }

    #[test]
    fn test_missing_ema_rejects() {
        let mut snap = snapshot(0, 10.0, 10.6, 9.9, 10.5, 1.0);
        assert!(!check_trend(&snap, Direction::Long));
        snap.indicators.ema_long = f64::NAN;
        assert!(!check_trend(&snap, Direction::Long));
        snap.indicators.ema_long = -1.0;
        assert!(!check_trend(&snap, Direction::Short));
    }
}
