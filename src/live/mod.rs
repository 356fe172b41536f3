//! Live orchestration
//!
//! - [`instrument`] - per-instrument bar/price loop
//! - [`monitor`] - one task per instrument, aggregate stats

pub mod instrument;
pub mod monitor;

pub use instrument::InstrumentTrader;
pub use monitor::{resolve_instruments, Instrument, MultiSymbolMonitor};
