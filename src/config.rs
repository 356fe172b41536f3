//! Runtime configuration for the trader

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trading_core::indicators::EMA_LONG_PERIOD;
use crate::trading_core::{LifecycleConfig, StrategyConfig};

pub const DEFAULT_SYMBOL: &str = "XPL_USDC_PERP";
pub const DEFAULT_INTERVAL: &str = "1m";
pub const DEFAULT_LEVERAGE: f64 = 1.0;
pub const DEFAULT_MAX_POSITION_FRACTION: f64 = 0.02;

/// Execution mode determines whether orders are simulated or sent to the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionMode {
    /// Simulated fills against the last traded price
    #[default]
    Paper,
    /// Signed orders on the exchange
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

/// Configuration for one trading process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    /// Execution mode (paper or live)
    pub mode: ExecutionMode,

    /// Instruments to trade. Empty means discover PERP markets.
    pub symbols: Vec<String>,

    /// Cap on discovered instruments
    pub max_symbols: usize,

    /// Bar interval (e.g. "1m")
    pub interval: String,

    /// Bars requested per poll; must cover indicator warm-up
    pub bars_per_fetch: usize,

    /// Latest-price poll period for position management
    pub price_poll: Duration,

    /// Leverage multiplier applied to sizing
    pub leverage: f64,

    /// Fraction of balance committed per entry (0.02 = 2%)
    pub max_position_fraction: f64,

    /// Send a close order for every triggered exit. When false, take-profit
    /// and stop-loss are left to the triggers attached to the entry order;
    /// trailing and timeout exits are always closed by the trader.
    pub local_exits: bool,

    /// Starting balance for the paper broker
    pub paper_balance: f64,

    pub strategy: StrategyConfig,

    pub lifecycle: LifecycleConfig,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            symbols: vec![DEFAULT_SYMBOL.to_string()],
            max_symbols: 20,
            interval: DEFAULT_INTERVAL.to_string(),
            bars_per_fetch: 200,
            price_poll: Duration::from_secs(10),
            leverage: DEFAULT_LEVERAGE,
            max_position_fraction: DEFAULT_MAX_POSITION_FRACTION,
            local_exits: true,
            paper_balance: 1000.0,
            strategy: StrategyConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl TraderConfig {
    /// Replace non-positive sizing inputs with their defaults and widen the
    /// bar fetch to cover indicator warm-up
    pub fn normalized(mut self) -> Self {
        if !(self.leverage > 0.0) {
            self.leverage = DEFAULT_LEVERAGE;
        }
        if !(self.max_position_fraction > 0.0) {
            self.max_position_fraction = DEFAULT_MAX_POSITION_FRACTION;
        }
        if self.max_symbols == 0 {
            self.max_symbols = 20;
        }
        self.lifecycle.max_concurrent_positions = self.lifecycle.max_concurrent_positions.max(1);
        // fetch window must cover the trend EMA warm-up
        let warm_up = self.strategy.trend_ema_period.max(EMA_LONG_PERIOD);
        self.bars_per_fetch = self.bars_per_fetch.max(warm_up + 1);
        self
    }

    /// Bar period implied by `interval`
    pub fn bar_period(&self) -> Duration {
        parse_interval(&self.interval)
    }
}

/// "1m", "5m", "15m", "1h", "4h", "1d" → duration; anything else is 5 minutes
pub fn parse_interval(interval: &str) -> Duration {
    let minutes = match interval {
        "1m" => 1,
        "5m" => 5,
        "15m" => 15,
        "1h" => 60,
        "4h" => 240,
        "1d" => 1440,
        _ => 5,
    };
    Duration::from_secs(minutes * 60)
}
