//! Backpack API Client
//!
//! HTTP client for the Backpack REST API. Public endpoints (klines,
//! markets, ticker, trades) back [`MarketData`]; with [`Credentials`]
//! attached, signed endpoints back [`Broker`] for live trading.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::auth::{body_params, Credentials};
use super::models::*;
use crate::config::parse_interval;
use crate::ports::{Broker, MarketData, OrderId, OrderRequest, OrderSide, OrderType};
use crate::trading_core::Trade;
use crate::types::Bar;

/// Public trades fetched per request, the endpoint maximum
pub const TRADES_LIMIT: usize = 1000;

/// Quote assets tried, in order, when the exact quote has no balance
const STABLE_FALLBACKS: [&str; 4] = ["USD", "USDC", "USDT", "USDP"];

/// Production base URL
pub const BASE_URL: &str = "https://api.backpack.exchange";

/// Backpack REST client, signed when credentials are attached
#[derive(Clone)]
pub struct BackpackClient {
    client: Client,
    base_url: String,
    credentials: Option<Arc<Credentials>>,
}

impl BackpackClient {
    /// Create a client from environment variables
    ///
    /// Reads `BACKPACK_BASE_URL` (optional), falling back to the production URL.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("BACKPACK_BASE_URL").unwrap_or_else(|_| BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Create a client with an explicit base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Attach signing credentials, enabling the account and order endpoints
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    /// Make a public GET request
    async fn get<R: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<R> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to send GET request to {}", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} failed ({}): {}", endpoint, status, body));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint))
    }

    /// Make a signed request and return the raw body
    async fn signed_raw(
        &self,
        method: Method,
        endpoint: &str,
        instruction: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<String> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| anyhow!("{} needs BACKPACK_API_KEY and BACKPACK_PRIVATE_KEY", endpoint))?;

        let mut params = body.as_ref().map(body_params).unwrap_or_default();
        params.extend(query.iter().map(|(k, v)| (k.to_string(), v.clone())));
        let headers = credentials.sign(instruction, &params, Utc::now().timestamp_millis());

        let mut request = self
            .client
            .request(method.clone(), format!("{}{}", self.base_url, endpoint))
            .query(query)
            .header("Accept", "application/json")
            .header("X-API-Key", headers.api_key)
            .header("X-Timestamp", headers.timestamp)
            .header("X-Window", headers.window)
            .header("X-Signature", headers.signature);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, endpoint))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", endpoint))?;
        if !status.is_success() {
            return Err(anyhow!("{} {} failed ({}): {}", method, endpoint, status, text));
        }
        Ok(text)
    }

    async fn signed<R: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        instruction: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<R> {
        let text = self.signed_raw(method, endpoint, instruction, query, body).await?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse response from {}: {}", endpoint, text))
    }

    /// Klines covering the last `limit` intervals, oldest first
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<KlineResponse>> {
        let end_time = Utc::now().timestamp();
        let span = parse_interval(interval).as_secs() as i64 * limit as i64;
        let start_time = end_time - span;

        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("startTime", start_time.to_string()),
            ("endTime", end_time.to_string()),
            ("limit", limit.to_string()),
        ];
        let klines: Vec<KlineResponse> = self.get("/api/v1/klines", &query).await?;
        debug!("Fetched {} klines for {} ({})", klines.len(), symbol, interval);
        Ok(klines)
    }

    pub async fn get_markets(&self) -> Result<Vec<Market>> {
        self.get("/api/v1/markets", &[]).await
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.get("/api/v1/ticker", &[("symbol", symbol.to_string())])
            .await
    }

    /// Most recent public trades, newest first as the venue returns them
    pub async fn get_trades(&self, symbol: &str, limit: usize) -> Result<Vec<PublicTrade>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("limit", limit.min(TRADES_LIMIT).to_string()),
        ];
        self.get("/api/v1/trades", &query).await
    }

    pub async fn execute_order(&self, body: &OrderBody) -> Result<OrderResponse> {
        let body = serde_json::to_value(body).context("Failed to serialize order")?;
        self.signed(Method::POST, "/api/v1/order", "orderExecute", &[], Some(body))
            .await
    }

    /// Open futures positions. The venue answers 404 when there are none.
    pub async fn get_positions(&self) -> Result<Vec<FuturePosition>> {
        match self
            .signed_raw(Method::GET, "/api/v1/position", "positionQuery", &[], None)
            .await
        {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse positions: {}", text)),
            Err(e) if e.to_string().contains(StatusCode::NOT_FOUND.as_str()) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_capital(&self) -> Result<HashMap<String, CapitalBalance>> {
        self.signed(Method::GET, "/api/v1/capital", "balanceQuery", &[], None)
            .await
    }

    pub async fn set_leverage(&self, leverage: u32) -> Result<()> {
        let body = serde_json::to_value(AccountUpdate {
            leverage_limit: leverage.to_string(),
        })?;
        self.signed_raw(Method::PATCH, "/api/v1/account", "accountUpdate", &[], Some(body))
            .await?;
        info!("Account leverage limit set to {}x", leverage);
        Ok(())
    }
}

/// Render a quantity or price without float noise or trailing zeros
fn decimal(value: f64) -> String {
    let s = format!("{:.8}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn venue_side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Bid",
        OrderSide::Sell => "Ask",
    }
}

/// Market entries are IOC with mark-price protective triggers
fn order_body(order: &OrderRequest) -> OrderBody {
    let (order_type, price, time_in_force) = match order.order_type {
        OrderType::Market => ("Market", None, Some("IOC".to_string())),
        OrderType::Limit { price } => ("Limit", Some(decimal(price)), None),
    };
    OrderBody {
        symbol: order.instrument.clone(),
        side: venue_side(order.side).to_string(),
        order_type: order_type.to_string(),
        price,
        quantity: decimal(order.quantity),
        time_in_force,
        reduce_only: false,
        stop_loss_trigger_price: order.stop_loss_trigger.map(decimal),
        stop_loss_trigger_by: order.stop_loss_trigger.map(|_| "MarkPrice".to_string()),
        take_profit_trigger_price: order.take_profit_trigger.map(decimal),
        take_profit_trigger_by: order.take_profit_trigger.map(|_| "MarkPrice".to_string()),
    }
}

/// Available balance for `quote`: exact match first, then USD for USDC
/// (and USDC for USD) when funded, then any funded stablecoin.
pub fn select_balance(
    capital: &HashMap<String, CapitalBalance>,
    quote: &str,
) -> Option<(String, f64)> {
    let find = |asset: &str| {
        capital
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(asset))
            .map(|(name, balance)| (name.clone(), balance))
    };

    if let Some((name, balance)) = find(quote) {
        return Some((name, balance.available()));
    }
    let swapped = if quote.eq_ignore_ascii_case("USDC") {
        Some("USD")
    } else if quote.eq_ignore_ascii_case("USD") {
        Some("USDC")
    } else {
        None
    };
    if let Some((name, balance)) = swapped.and_then(find) {
        if balance.available() > 0.0 {
            return Some((name, balance.available()));
        }
    }
    STABLE_FALLBACKS
        .iter()
        .filter_map(|asset| find(*asset))
        .find(|(_, balance)| balance.total() > 0.0)
        .map(|(name, balance)| (name, balance.available()))
}

#[async_trait]
impl MarketData for BackpackClient {
    async fn recent_bars(&self, instrument: &str, interval: &str, count: usize) -> Result<Vec<Bar>> {
        let klines = self.get_klines(instrument, interval, count).await?;
        let mut bars = klines
            .iter()
            .map(KlineResponse::to_bar)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to convert klines for {}", instrument))?;
        bars.sort_by_key(|b| b.start_time);
        Ok(bars)
    }

    async fn latest_price(&self, instrument: &str) -> Result<f64> {
        let ticker = self.get_ticker(instrument).await?;
        ticker
            .last_price
            .parse::<f64>()
            .with_context(|| format!("Invalid last price '{}' for {}", ticker.last_price, instrument))
    }

    async fn recent_trades(&self, instrument: &str, limit: usize) -> Result<Vec<Trade>> {
        let mut trades = self
            .get_trades(instrument, limit)
            .await?
            .iter()
            .map(PublicTrade::to_trade)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to convert trades for {}", instrument))?;
        trades.sort_by_key(|t| t.ts_event);
        Ok(trades)
    }
}

#[async_trait]
impl Broker for BackpackClient {
    async fn account_balance(&self, quote_asset: &str) -> Result<f64> {
        let capital = self.get_capital().await?;
        let (asset, available) = select_balance(&capital, quote_asset)
            .ok_or_else(|| anyhow!("No {} or stablecoin balance in account", quote_asset))?;
        if !asset.eq_ignore_ascii_case(quote_asset) {
            debug!("Using {} balance for {} quote", asset, quote_asset);
        }
        Ok(available)
    }

    async fn place_order(&self, order: OrderRequest) -> Result<OrderId> {
        let body = order_body(&order);
        info!(
            "Placing {} {} {} qty {} (SL {:?}, TP {:?})",
            body.order_type,
            body.side,
            body.symbol,
            body.quantity,
            body.stop_loss_trigger_price,
            body.take_profit_trigger_price
        );
        let response = self.execute_order(&body).await?;
        Ok(OrderId(response.id))
    }

    async fn close_position(&self, instrument: &str) -> Result<OrderId> {
        let positions = self.get_positions().await.context("Failed to query positions")?;
        let Some(position) = positions.iter().find(|p| p.symbol == instrument) else {
            bail!("No open position on {}", instrument);
        };
        let net = position.net()?;
        if net.abs() < 1e-8 {
            bail!("Position on {} is already flat", instrument);
        }

        let side = if net > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
        let body = OrderBody {
            symbol: instrument.to_string(),
            side: venue_side(side).to_string(),
            order_type: "Market".to_string(),
            quantity: decimal(net.abs()),
            time_in_force: Some("IOC".to_string()),
            reduce_only: true,
            ..Default::default()
        };
        let response = self.execute_order(&body).await?;
        if ["Cancelled", "Expired"]
            .iter()
            .any(|s| response.status.eq_ignore_ascii_case(s))
        {
            warn!("Close order {} on {} ended {}", response.id, instrument, response.status);
            bail!("Close order on {} was not filled ({})", instrument, response.status);
        }
        Ok(OrderId(response.id))
    }
}
