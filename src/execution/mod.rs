//! Execution module
//!
//! Order routing behind the `Broker` trait. Paper mode simulates fills at
//! the last traded price, including the protective triggers attached to an
//! entry. Live mode routes through the signed `BackpackClient`.

mod paper;

pub use paper::{Fill, PaperBroker};
