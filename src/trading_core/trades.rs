//! Trade prints with top-of-book context
//!
//! Venues that publish the taker side (Backpack's `isBuyerMaker`) classify
//! the aggressor directly; otherwise it is inferred from the book.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw trade from market data, stamped with the book at print time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ts_event: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    /// Aggressor as reported by the venue
    #[serde(default)]
    pub taker_side: Option<Side>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Trade {
    /// Print whose taker side is known but whose book is not
    pub fn with_taker(ts_event: DateTime<Utc>, price: f64, size: f64, taker_side: Side) -> Self {
        Self {
            ts_event,
            price,
            size,
            best_bid: f64::NAN,
            best_ask: f64::NAN,
            taker_side: Some(taker_side),
        }
    }

    /// Aggressor side: the venue's taker flag when present, otherwise
    /// lifting the ask is a buy and hitting the bid is a sell.
    /// Prints inside the spread are unclassified.
    pub fn aggressor(&self) -> Option<Side> {
        if let Some(side) = self.taker_side {
            Some(side)
        } else if self.price >= self.best_ask {
            Some(Side::Buy)
        } else if self.price <= self.best_bid {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(price: f64) -> Trade {
        Trade {
            ts_event: Utc::now(),
            price,
            size: 1.0,
            best_bid: 99.0,
            best_ask: 101.0,
            taker_side: None,
        }
    }

    #[test]
    fn test_aggressor() {
        assert_eq!(trade(101.0).aggressor(), Some(Side::Buy));
        assert_eq!(trade(101.5).aggressor(), Some(Side::Buy));
        assert_eq!(trade(99.0).aggressor(), Some(Side::Sell));
        assert_eq!(trade(100.0).aggressor(), None);
    }

    #[test]
    fn test_taker_side_overrides_book() {
        let t = Trade::with_taker(Utc::now(), 100.0, 2.0, Side::Sell);
        assert_eq!(t.aggressor(), Some(Side::Sell));

        let mut t = trade(101.0);
        t.taker_side = Some(Side::Sell);
        assert_eq!(t.aggressor(), Some(Side::Sell));
    }
}
