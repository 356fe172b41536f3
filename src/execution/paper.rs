//! Paper broker: simulated fills at the last traded price
//!
//! Stop-loss and take-profit triggers attached to an entry rest on the
//! instrument until the position is flat, and fill at the observed price
//! once crossed.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ports::{Broker, MarketData, OrderId, OrderRequest, OrderSide, OrderType};

/// Net simulated exposure on one instrument
#[derive(Debug, Clone, Default)]
struct NetPosition {
    /// Positive = long, negative = short
    quantity: f64,
    avg_entry_price: f64,
}

/// Fill record kept for inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    /// Realized on this fill, in quote currency
    pub realized_pnl: f64,
    pub time: DateTime<Utc>,
}

/// Protective triggers resting on an instrument
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Triggers {
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

impl Triggers {
    /// Whether `price` crosses either trigger of a position with sign `sign`
    fn crossed(&self, sign: f64, price: f64) -> bool {
        let stop = self.stop_loss.is_some_and(|sl| (sl - price) * sign >= 0.0);
        let target = self.take_profit.is_some_and(|tp| (price - tp) * sign >= 0.0);
        stop || target
    }
}

#[derive(Debug, Default)]
struct Ledger {
    balance: f64,
    positions: HashMap<String, NetPosition>,
    triggers: HashMap<String, Triggers>,
    fills: Vec<Fill>,
}

/// Simulated broker backed by a price source
pub struct PaperBroker {
    prices: Arc<dyn MarketData>,
    ledger: Mutex<Ledger>,
}

impl PaperBroker {
    pub fn new(prices: Arc<dyn MarketData>, starting_balance: f64) -> Self {
        Self {
            prices,
            ledger: Mutex::new(Ledger {
                balance: starting_balance,
                ..Default::default()
            }),
        }
    }

    /// Signed open quantity on `instrument`
    pub async fn net_quantity(&self, instrument: &str) -> f64 {
        let ledger = self.ledger.lock().await;
        ledger
            .positions
            .get(instrument)
            .map(|p| p.quantity)
            .unwrap_or(0.0)
    }

    /// Whether protective triggers rest on `instrument`
    pub async fn has_triggers(&self, instrument: &str) -> bool {
        self.ledger.lock().await.triggers.contains_key(instrument)
    }

    pub async fn fills(&self) -> Vec<Fill> {
        self.ledger.lock().await.fills.clone()
    }

    async fn fill(&self, instrument: &str, side: OrderSide, quantity: f64, price: f64) -> OrderId {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        let mut ledger = self.ledger.lock().await;
        let position = ledger.positions.entry(instrument.to_string()).or_default();

        let mut realized = 0.0;
        if position.quantity != 0.0 && position.quantity.signum() != signed.signum() {
            // reducing or flipping
            let closed = signed.abs().min(position.quantity.abs());
            realized = (price - position.avg_entry_price) * closed * position.quantity.signum();
            position.quantity += signed;
            if position.quantity.abs() < f64::EPSILON {
                *position = NetPosition::default();
            } else if position.quantity.signum() == signed.signum() {
                position.avg_entry_price = price;
            }
        } else {
            let total = position.quantity.abs() + quantity;
            position.avg_entry_price =
                (position.avg_entry_price * position.quantity.abs() + price * quantity) / total;
            position.quantity += signed;
        }

        if position.quantity == 0.0 {
            ledger.triggers.remove(instrument);
        }
        ledger.balance += realized;
        let order_id = Uuid::new_v4().to_string();
        ledger.fills.push(Fill {
            order_id: order_id.clone(),
            instrument: instrument.to_string(),
            side,
            quantity,
            price,
            realized_pnl: realized,
            time: Utc::now(),
        });

        info!(
            "PAPER FILL {:?} {:.6} {} @ {:.6} | realized {:.6} | balance {:.4}",
            side, quantity, instrument, price, realized, ledger.balance
        );
        OrderId(order_id)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn account_balance(&self, _quote_asset: &str) -> Result<f64> {
        Ok(self.ledger.lock().await.balance)
    }

    async fn place_order(&self, order: OrderRequest) -> Result<OrderId> {
        if !(order.quantity > 0.0) {
            return Err(anyhow!("Order quantity must be positive, got {}", order.quantity));
        }
        let price = match order.order_type {
            OrderType::Market => self.prices.latest_price(&order.instrument).await?,
            OrderType::Limit { price } => price,
        };
        let order_id = self.fill(&order.instrument, order.side, order.quantity, price).await;

        let triggers = Triggers {
            stop_loss: order.stop_loss_trigger,
            take_profit: order.take_profit_trigger,
        };
        if triggers != Triggers::default() {
            let mut ledger = self.ledger.lock().await;
            if ledger.positions.get(&order.instrument).is_some_and(|p| p.quantity != 0.0) {
                ledger.triggers.insert(order.instrument.clone(), triggers);
            }
        }
        Ok(order_id)
    }

    async fn close_position(&self, instrument: &str) -> Result<OrderId> {
        let quantity = self.net_quantity(instrument).await;
        if quantity == 0.0 {
            return Err(anyhow!("No open paper position on {}", instrument));
        }
        let price = self.prices.latest_price(instrument).await?;
        let side = if quantity > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        Ok(self.fill(instrument, side, quantity.abs(), price).await)
    }

    async fn observe_price(&self, instrument: &str, price: f64) -> Result<()> {
        let quantity = {
            let ledger = self.ledger.lock().await;
            let (Some(triggers), Some(position)) =
                (ledger.triggers.get(instrument), ledger.positions.get(instrument))
            else {
                return Ok(());
            };
            if position.quantity == 0.0 || !triggers.crossed(position.quantity.signum(), price) {
                return Ok(());
            }
            position.quantity
        };

        debug!("PAPER trigger hit on {} @ {:.6}", instrument, price);
        let side = if quantity > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        self.fill(instrument, side, quantity.abs(), price).await;
        Ok(())
    }
}
