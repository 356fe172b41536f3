//! Backpack Exchange Integration
//!
//! Market data and order routing over the Backpack REST API.
//!
//! # Components
//!
//! - [`client`] - HTTP client, implements `MarketData` and `Broker`
//! - [`auth`] - ed25519 request signing
//! - [`models`] - Request and response data types
//!
//! # Environment Variables
//!
//! - `BACKPACK_BASE_URL` (optional) - Override the API host
//! - `BACKPACK_API_KEY` - Base64 public key (live mode)
//! - `BACKPACK_PRIVATE_KEY` - Base64 ed25519 seed (live mode)
//! - `BACKPACK_WINDOW_MS` (optional) - Signature receive window
//!
//! # API Endpoints Used
//!
//! - `GET /api/v1/klines` - Bars
//! - `GET /api/v1/markets` - Market discovery
//! - `GET /api/v1/ticker` - Last price
//! - `GET /api/v1/trades` - Public trades for trade-level delta
//! - `POST /api/v1/order` - Entries and reduce-only closes (`orderExecute`)
//! - `GET /api/v1/position` - Open positions (`positionQuery`)
//! - `GET /api/v1/capital` - Balances (`balanceQuery`)
//! - `PATCH /api/v1/account` - Leverage limit (`accountUpdate`)

pub mod auth;
pub mod client;
pub mod models;

pub use auth::Credentials;
pub use client::BackpackClient;
pub use models::{KlineResponse, Market, Ticker};

const PERP_SUFFIX: &str = "_PERP";

/// `SOL_USDC` → `SOL_USDC_PERP`; already-perp symbols pass through
pub fn futures_symbol(symbol: &str) -> String {
    if symbol.ends_with(PERP_SUFFIX) {
        symbol.to_string()
    } else {
        format!("{}{}", symbol, PERP_SUFFIX)
    }
}

/// Quote asset of a symbol: `XPL_USDC_PERP` → `USDC`, `SOL_USDC` → `USDC`,
/// anything without an underscore → `USD`
pub fn quote_asset(symbol: &str) -> String {
    let parts: Vec<&str> = symbol.split('_').collect();
    match parts.as_slice() {
        [.., quote, "PERP"] if parts.len() >= 3 => quote.to_string(),
        [_, .., last] if parts.len() >= 2 => last.to_string(),
        _ => "USD".to_string(),
    }
}
