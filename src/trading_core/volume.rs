//! Relative volume filter

use serde::{Deserialize, Serialize};

use crate::types::Bar;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Prior bars averaged (V_LOOKBACK)
    pub lookback: usize,
    /// Required multiple of the average (V_MULT)
    pub multiplier: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            multiplier: 1.25,
        }
    }
}

/// Outcome of a volume check, kept for status logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCheck {
    pub passed: bool,
    pub current: f64,
    pub average: f64,
}

/// Compare `current` against the mean volume of up to `lookback` bars in
/// `prior` (oldest first, current excluded). No prior bars fails closed.
pub fn check_volume(config: &VolumeConfig, current: &Bar, prior: &[&Bar]) -> VolumeCheck {
    let take = config.lookback.max(1).min(prior.len());
    if take == 0 {
        return VolumeCheck {
            passed: false,
            current: current.volume,
            average: 0.0,
        };
    }

    let average = prior[prior.len() - take..]
        .iter()
        .map(|b| b.volume)
        .sum::<f64>()
        / take as f64;

    VolumeCheck {
        passed: current.volume >= average * config.multiplier,
        current: current.volume,
        average,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::bar;

    fn flat_prior(n: i64, volume: f64) -> Vec<Bar> {
        (0..n).map(|i| bar(i, 10.0, 10.5, 9.5, 10.0, volume)).collect()
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let prior = flat_prior(20, 100.0);
        let refs: Vec<&Bar> = prior.iter().collect();
        let config = VolumeConfig::default();

        let exact = bar(20, 10.0, 10.5, 9.5, 10.0, 125.0);
        let check = check_volume(&config, &exact, &refs);
        assert!(check.passed);
        assert_eq!(check.average, 100.0);

        let below = bar(20, 10.0, 10.5, 9.5, 10.0, 124.99);
        assert!(!check_volume(&config, &below, &refs).passed);
    }

    #[test]
    fn test_uses_available_bars_when_short() {
        let prior = flat_prior(3, 40.0);
        let refs: Vec<&Bar> = prior.iter().collect();
        let current = bar(3, 10.0, 10.5, 9.5, 10.0, 50.0);
        let check = check_volume(&VolumeConfig::default(), &current, &refs);
        assert_eq!(check.average, 40.0);
        assert!(check.passed);
    }

    #[test]
    fn test_only_last_lookback_bars_count() {
        let mut prior = flat_prior(5, 1000.0);
        prior.extend((5..25).map(|i| bar(i, 10.0, 10.5, 9.5, 10.0, 10.0)));
        let refs: Vec<&Bar> = prior.iter().collect();
        let current = bar(25, 10.0, 10.5, 9.5, 10.0, 13.0);
        let check = check_volume(&VolumeConfig::default(), &current, &refs);
        assert_eq!(check.average, 10.0);
        assert!(check.passed);
    }

    #[test]
    fn test_no_prior_bars_rejects() {
        let current = bar(0, 10.0, 10.5, 9.5, 10.0, 1_000_000.0);
        assert!(!check_volume(&VolumeConfig::default(), &current, &[]).passed);
    }
}
