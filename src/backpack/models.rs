//! Backpack API Data Models
//!
//! Response types for the public Backpack REST endpoints. Numeric fields
//! arrive as strings.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trading_core::{InstrumentSpec, Side, Trade};
use crate::types::Bar;

// ============================================================================
// Klines
// ============================================================================

/// One kline from `GET /api/v1/klines`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineResponse {
    pub start: String,
    pub end: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    #[serde(default)]
    pub quote_volume: String,
    #[serde(default)]
    pub trades: String,
}

impl KlineResponse {
    pub fn to_bar(&self) -> Result<Bar> {
        Ok(Bar {
            start_time: parse_time(&self.start)?,
            end_time: parse_time(&self.end)?,
            open: parse_number(&self.open, "open")?,
            high: parse_number(&self.high, "high")?,
            low: parse_number(&self.low, "low")?,
            close: parse_number(&self.close, "close")?,
            volume: parse_number(&self.volume, "volume")?,
            quote_volume: self.quote_volume.parse().unwrap_or(0.0),
        })
    }
}

const TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("Unrecognised kline timestamp '{}'", s))
}

fn parse_number(s: &str, field: &str) -> Result<f64> {
    s.parse::<f64>()
        .with_context(|| format!("Invalid {} '{}'", field, s))
}

// ============================================================================
// Markets
// ============================================================================

/// Entry from `GET /api/v1/markets`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub symbol: String,
    #[serde(default)]
    pub base_symbol: String,
    #[serde(default)]
    pub quote_symbol: String,
    #[serde(default)]
    pub market_type: String,
    #[serde(default)]
    pub order_book_state: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub filters: Option<MarketFilters>,
}

fn default_visible() -> bool {
    true
}

impl Market {
    /// Perpetual, listed and accepting orders
    pub fn is_tradable_perp(&self) -> bool {
        self.market_type == "PERP" && self.visible && self.order_book_state == "Open"
    }

    /// Step, minimum quantity and tick from the market filters
    pub fn spec(&self) -> Option<InstrumentSpec> {
        let filters = self.filters.as_ref()?;
        let quantity = filters.quantity.as_ref()?;
        let price = filters.price.as_ref()?;
        let step_size: f64 = quantity.step_size.parse().ok()?;
        Some(InstrumentSpec {
            step_size,
            min_quantity: quantity
                .min_quantity
                .as_deref()
                .and_then(|q| q.parse().ok())
                .unwrap_or(step_size),
            tick_size: price.tick_size.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilters {
    #[serde(default)]
    pub price: Option<PriceFilter>,
    #[serde(default)]
    pub quantity: Option<QuantityFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub tick_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityFilter {
    pub step_size: String,
    #[serde(default)]
    pub min_quantity: Option<String>,
}

// ============================================================================
// Ticker
// ============================================================================

/// Response from `GET /api/v1/ticker`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_price: String,
}

// ============================================================================
// Trades
// ============================================================================

/// Entry from `GET /api/v1/trades`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTrade {
    #[serde(default)]
    pub id: Option<u64>,
    pub price: String,
    pub quantity: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub is_buyer_maker: bool,
}

impl PublicTrade {
    /// A resting buyer means the seller took liquidity
    pub fn to_trade(&self) -> Result<Trade> {
        let ts_event = DateTime::<Utc>::from_timestamp_millis(self.timestamp)
            .ok_or_else(|| anyhow!("Invalid trade timestamp {}", self.timestamp))?;
        let taker = if self.is_buyer_maker { Side::Sell } else { Side::Buy };
        Ok(Trade::with_taker(
            ts_event,
            parse_number(&self.price, "price")?,
            parse_number(&self.quantity, "quantity")?,
            taker,
        ))
    }
}

// ============================================================================
// Orders (authenticated)
// ============================================================================

/// Body of `POST /api/v1/order`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBody {
    pub symbol: String,
    /// "Bid" or "Ask"
    pub side: String,
    /// "Market" or "Limit"
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub quantity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_trigger_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_trigger_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_trigger_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_trigger_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub status: String,
}

// ============================================================================
// Account (authenticated)
// ============================================================================

/// Entry from `GET /api/v1/position`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturePosition {
    pub symbol: String,
    /// Positive = long, negative = short
    pub net_quantity: String,
    #[serde(default)]
    pub entry_price: String,
    #[serde(default)]
    pub mark_price: String,
}

impl FuturePosition {
    pub fn net(&self) -> Result<f64> {
        self.net_quantity
            .parse()
            .with_context(|| format!("Invalid net quantity '{}' for {}", self.net_quantity, self.symbol))
    }
}

/// Value in the `GET /api/v1/capital` map, keyed by asset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapitalBalance {
    #[serde(default)]
    pub available: String,
    #[serde(default)]
    pub locked: String,
    #[serde(default)]
    pub staked: String,
}

impl CapitalBalance {
    pub fn available(&self) -> f64 {
        self.available.parse().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        [&self.available, &self.locked, &self.staked]
            .iter()
            .map(|v| v.parse::<f64>().unwrap_or(0.0))
            .sum()
    }
}

/// Body of `PATCH /api/v1/account`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub leverage_limit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kline_to_bar() {
        let json = r#"{
            "start": "2025-01-01 00:00:00",
            "end": "2025-01-01 00:01:00",
            "open": "1.10", "high": "1.20", "low": "1.05", "close": "1.15",
            "volume": "1000", "quoteVolume": "1150", "trades": "42"
        }"#;
        let kline: KlineResponse = serde_json::from_str(json).unwrap();
        let bar = kline.to_bar().unwrap();
        assert_eq!(bar.close, 1.15);
        assert_eq!(bar.volume, 1000.0);
        assert_eq!(bar.quote_volume, 1150.0);
        assert_eq!((bar.end_time - bar.start_time).num_seconds(), 60);
    }

    #[test]
    fn test_kline_rfc3339_and_bad_number() {
        let mut kline = KlineResponse {
            start: "2025-01-01T00:00:00Z".into(),
            end: "2025-01-01T00:01:00".into(),
            open: "1".into(),
            high: "1".into(),
            low: "1".into(),
            close: "1".into(),
            volume: "0".into(),
            quote_volume: String::new(),
            trades: String::new(),
        };
        assert!(kline.to_bar().is_ok());
        kline.close = "n/a".into();
        assert!(kline.to_bar().is_err());
    }

    #[test]
    fn test_market_filter() {
        let json = r#"[
            {"symbol": "SOL_USDC_PERP", "marketType": "PERP", "orderBookState": "Open", "visible": true},
            {"symbol": "SOL_USDC", "marketType": "SPOT", "orderBookState": "Open", "visible": true},
            {"symbol": "OLD_USDC_PERP", "marketType": "PERP", "orderBookState": "Closed", "visible": true},
            {"symbol": "HID_USDC_PERP", "marketType": "PERP", "orderBookState": "Open", "visible": false}
        ]"#;
        let markets: Vec<Market> = serde_json::from_str(json).unwrap();
        let tradable: Vec<&str> = markets
            .iter()
            .filter(|m| m.is_tradable_perp())
            .map(|m| m.symbol.as_str())
            .collect();
        assert_eq!(tradable, vec!["SOL_USDC_PERP"]);
        assert!(markets[0].spec().is_none());
    }

    #[test]
    fn test_market_spec() {
        let json = r#"{
            "symbol": "SOL_USDC_PERP", "marketType": "PERP", "orderBookState": "Open",
            "filters": {
                "price": {"tickSize": "0.01"},
                "quantity": {"stepSize": "0.001", "minQuantity": "0.01"}
            }
        }"#;
        let market: Market = serde_json::from_str(json).unwrap();
        let spec = market.spec().unwrap();
        assert_eq!(spec.tick_size, 0.01);
        assert_eq!(spec.step_size, 0.001);
        assert_eq!(spec.min_quantity, 0.01);
    }

    #[test]
    fn test_public_trade_taker_side() {
        let json = r#"[
            {"id": 1, "price": "10.5", "quantity": "2", "quoteQuantity": "21", "timestamp": 1700000000123, "isBuyerMaker": true},
            {"id": 2, "price": "10.6", "quantity": "1", "quoteQuantity": "10.6", "timestamp": 1700000000456, "isBuyerMaker": false}
        ]"#;
        let trades: Vec<PublicTrade> = serde_json::from_str(json).unwrap();
        let sell = trades[0].to_trade().unwrap();
        assert_eq!(sell.aggressor(), Some(Side::Sell));
        assert_eq!(sell.size, 2.0);
        assert_eq!(sell.ts_event.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(trades[1].to_trade().unwrap().aggressor(), Some(Side::Buy));
    }

    #[test]
    fn test_order_body_omits_unset_fields() {
        let body = OrderBody {
            symbol: "SOL_USDC_PERP".into(),
            side: "Ask".into(),
            order_type: "Market".into(),
            quantity: "1.5".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(json["orderType"], "Market");
        assert!(json.get("reduceOnly").is_none());
    }

    #[test]
    fn test_capital_balance() {
        let json = r#"{"USDC": {"available": "12.5", "locked": "1", "staked": "0"}}"#;
        let capital: std::collections::HashMap<String, CapitalBalance> =
            serde_json::from_str(json).unwrap();
        assert_eq!(capital["USDC"].available(), 12.5);
        assert_eq!(capital["USDC"].total(), 13.5);
    }
}
