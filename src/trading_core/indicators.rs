//! Indicator calculation (EMA, MACD, RSI) over a trailing bar window
//!
//! EMA is seeded with the SMA of its first `n` closes, then
//! `ema[i] = close[i] * k + ema[i-1] * (1 - k)` with `k = 2 / (n + 1)`.
//! RSI uses Wilder smoothing. A bar gets an indicator set only once the
//! long (trend) EMA is warm; the 55/144/169 EMAs report 0.0 until they are.

use serde::{Deserialize, Serialize};

use crate::types::{Bar, Indicators};

pub const EMA_SHORT_PERIOD: usize = 8;
/// Default long EMA period, also the minimum window
pub const EMA_LONG_PERIOD: usize = 30;

pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const RSI_PERIOD: usize = 14;

/// Computes an indicator set for every bar in a window
pub trait IndicatorCalculator: Send + Sync {
    /// One entry per input bar; `None` where the window is too short
    fn compute(&self, bars: &[Bar]) -> Vec<Option<Indicators>>;
}

/// EMA short/long + 55/144/169, MACD 12/26/9, RSI 14
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaMacdRsiCalculator {
    pub short_period: usize,
    pub long_period: usize,
}

impl Default for EmaMacdRsiCalculator {
    fn default() -> Self {
        Self {
            short_period: EMA_SHORT_PERIOD,
            long_period: EMA_LONG_PERIOD,
        }
    }
}

impl EmaMacdRsiCalculator {
    pub fn new(short_period: usize, long_period: usize) -> Self {
        Self {
            short_period: short_period.max(1),
            long_period: long_period.max(1),
        }
    }

    /// Bars needed before the first indicator set. Never below the
    /// default long EMA period, even when a shorter trend EMA is configured.
    pub fn min_window(&self) -> usize {
        self.long_period.max(EMA_LONG_PERIOD)
    }
}

impl IndicatorCalculator for EmaMacdRsiCalculator {
    fn compute(&self, bars: &[Bar]) -> Vec<Option<Indicators>> {
        let min_window = self.min_window();
        if bars.len() < min_window {
            return vec![None; bars.len()];
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let ema_short = ema(&closes, self.short_period);
        let ema_long = ema(&closes, self.long_period);
        let ema_55 = ema(&closes, 55);
        let ema_144 = ema(&closes, 144);
        let ema_169 = ema(&closes, 169);
        let (macd_line, signal_line) = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let rsi_values = rsi(&closes, RSI_PERIOD);

        (0..bars.len())
            .map(|i| {
                if i + 1 < min_window {
                    return None;
                }
                let macd = value_at(&macd_line, i);
                let macd_signal = value_at(&signal_line, i);
                Some(Indicators {
                    ema_short: value_at(&ema_short, i),
                    ema_long: value_at(&ema_long, i),
                    ema_55: value_at(&ema_55, i),
                    ema_144: value_at(&ema_144, i),
                    ema_169: value_at(&ema_169, i),
                    macd,
                    macd_signal,
                    macd_histogram: if macd_signal == 0.0 { 0.0 } else { macd - macd_signal },
                    rsi: value_at(&rsi_values, i),
                })
            })
            .collect()
    }
}

fn value_at(values: &[Option<f64>], i: usize) -> f64 {
    values.get(i).copied().flatten().unwrap_or(0.0)
}

/// SMA-seeded EMA; `None` during warm-up
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);
    for i in period..values.len() {
        current = values[i] * k + current * (1.0 - k);
        out[i] = Some(current);
    }
    out
}

/// MACD line and signal line
pub fn macd(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let mut signal_line = vec![None; values.len()];
    let defined: Vec<(usize, f64)> = line
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let defined_values: Vec<f64> = defined.iter().map(|(_, v)| *v).collect();
    for (j, value) in ema(&defined_values, signal).into_iter().enumerate() {
        signal_line[defined[j].0] = value;
    }

    (line, signal_line)
}

/// Wilder RSI; `None` until `period` price changes are available
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: f64| if c > 0.0 { c } else { 0.0 };
    let loss = |c: f64| if c < 0.0 { -c } else { 0.0 };

    let mut avg_gain = changes[..period].iter().map(|&c| gain(c)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|&c| loss(c)).sum::<f64>() / period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in period..changes.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gain(changes[i])) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss(changes[i])) / period as f64;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}
