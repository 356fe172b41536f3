//! Collaborator traits between the orchestrator and the outside world
//!
//! Market data, order routing and notifications are reached only through
//! these traits so the orchestrator can run against the exchange, the
//! paper broker, or in-memory fakes in tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::trading_core::{PerformanceStats, Position, Trade};
use crate::types::{Bar, Direction};

/// Source of closed bars and last prices
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Up to `count` most recent bars, oldest first
    async fn recent_bars(&self, instrument: &str, interval: &str, count: usize) -> Result<Vec<Bar>>;

    async fn latest_price(&self, instrument: &str) -> Result<f64>;

    /// Up to `limit` most recent public trades, oldest first
    async fn recent_trades(&self, instrument: &str, _limit: usize) -> Result<Vec<Trade>> {
        Err(anyhow!("No trade feed for {}", instrument))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: f64 },
}

/// Entry order with optional exchange-side protective triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub stop_loss_trigger: Option<f64>,
    pub take_profit_trigger: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order routing and account state
#[async_trait]
pub trait Broker: Send + Sync {
    /// Available balance in `quote_asset`
    async fn account_balance(&self, quote_asset: &str) -> Result<f64>;

    async fn place_order(&self, order: OrderRequest) -> Result<OrderId>;

    /// Flatten whatever is open on `instrument`
    async fn close_position(&self, instrument: &str) -> Result<OrderId>;

    /// Latest price seen by the orchestrator. Simulated venues settle
    /// resting triggers here; real venues do that themselves.
    async fn observe_price(&self, _instrument: &str, _price: f64) -> Result<()> {
        Ok(())
    }
}

/// Things worth telling a human about
#[derive(Debug, Clone)]
pub enum Event {
    Started {
        instrument: String,
        interval: String,
    },
    Entered(Position),
    Exited(Position),
    Error {
        instrument: String,
        message: String,
    },
    Summary(PerformanceStats),
}

impl Event {
    /// HTML body for chat delivery
    pub fn to_html(&self) -> String {
        match self {
            Event::Started {
                instrument,
                interval,
            } => format!("🚀 <b>Trader started</b>\n{} ({})", instrument, interval),
            Event::Entered(p) => format!(
                "📈 <b>{} {}</b>\nEntry: {:.6}\nQty: {:.6}\nSL: {:.6}\nTP: {:.6}",
                p.direction, p.instrument, p.entry_price, p.quantity, p.stop_loss, p.take_profit
            ),
            Event::Exited(p) => format!(
                "{} <b>Closed {} {}</b>\nExit: {:.6} ({})\nPnL: {:.6} ({:.3}%)",
                if p.realized_pnl >= 0.0 { "✅" } else { "❌" },
                p.direction,
                p.instrument,
                p.exit_price.unwrap_or_default(),
                p.exit_reason.map(|r| r.to_string()).unwrap_or_default(),
                p.realized_pnl,
                p.pnl_percent
            ),
            Event::Error {
                instrument,
                message,
            } => format!("⚠️ <b>{}</b>\n{}", instrument, message),
            Event::Summary(stats) => format!("📊 <b>Summary</b>\n{}", stats),
        }
    }
}

/// Fire-and-forget delivery. Implementations log failures themselves.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: Event);
}
