//! Trading Core - synchronous signal and position logic
//!
//! This module contains the core trading strategy components:
//! - Indicator calculation (EMA, MACD, RSI)
//! - Candlestick pattern detection
//! - Volume, delta and trend filters
//! - Signal fusion over bounded per-instrument history
//! - Position lifecycle (sizing, trailing stop, exits, PnL)
//!
//! Nothing here performs I/O.

pub mod delta;
pub mod fusion;
pub mod history;
pub mod indicators;
pub mod pattern;
pub mod position;
pub mod sizing;
pub mod trades;
pub mod trend;
pub mod volume;

// Re-export commonly used types
pub use delta::{
    CandleDeltaEstimator, DeltaConfig, DeltaEstimator, DeltaSample, DeltaSource, DeltaWindow,
    ThresholdMode, TradeDeltaEstimator,
};
pub use fusion::{Evaluation, Rejection, SignalEngine, StrategyConfig};
pub use history::BoundedHistory;
pub use indicators::{EmaMacdRsiCalculator, IndicatorCalculator};
pub use pattern::{PatternConfig, PatternDetector, PatternKind, PatternResult};
pub use position::{
    ExitReason, Fees, LifecycleConfig, LifecycleError, PerformanceStats, Position, PositionBook,
    PositionStatus, PositionUpdate,
};
pub use sizing::{compute_quantity, floor_to_step, floor_to_tick, InstrumentSpec, SizingError};
pub use trades::{Side, Trade};
pub use volume::VolumeConfig;
