// Library crate - signal fusion, position lifecycle and exchange plumbing

pub mod backpack;
pub mod config;
pub mod execution;
pub mod live;
pub mod notify;
pub mod ports;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use config::{ExecutionMode, TraderConfig};
pub use trading_core::{Evaluation, PositionBook, SignalEngine};
pub use types::*;
