//! Multi-symbol monitor
//!
//! Resolves the instrument list, runs one [`InstrumentTrader`] task per
//! instrument and aggregates their statistics on shutdown.

use std::sync::Arc;

use anyhow::{bail, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::instrument::InstrumentTrader;
use crate::backpack::{BackpackClient, Market};
use crate::config::TraderConfig;
use crate::ports::{Broker, Event, MarketData, Notifier};
use crate::trading_core::{InstrumentSpec, PerformanceStats};

/// Instrument to trade plus its exchange increments, when known
pub type Instrument = (String, Option<InstrumentSpec>);

/// Configured symbols, or tradable PERP markets when none are configured.
/// Capped at `max_symbols`.
pub async fn resolve_instruments(
    config: &TraderConfig,
    client: &BackpackClient,
) -> Result<Vec<Instrument>> {
    let markets = match client.get_markets().await {
        Ok(markets) => markets,
        Err(e) if !config.symbols.is_empty() => {
            warn!("Market list unavailable, trading without increments: {:#}", e);
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    let spec_for = |symbol: &str| {
        markets
            .iter()
            .find(|m| m.symbol == symbol)
            .and_then(Market::spec)
    };

    let mut symbols: Vec<String> = if config.symbols.is_empty() {
        let discovered: Vec<String> = markets
            .iter()
            .filter(|m| m.is_tradable_perp())
            .map(|m| m.symbol.clone())
            .collect();
        info!("Found {} PERP markets", discovered.len());
        discovered
    } else {
        config.symbols.clone()
    };

    if symbols.is_empty() {
        bail!("No tradable symbols");
    }
    if symbols.len() > config.max_symbols {
        info!(
            "Limiting to {} of {} symbols",
            config.max_symbols,
            symbols.len()
        );
        symbols.truncate(config.max_symbols);
    }

    Ok(symbols
        .into_iter()
        .map(|symbol| {
            let spec = spec_for(&symbol);
            (symbol, spec)
        })
        .collect())
}

pub struct MultiSymbolMonitor {
    config: Arc<TraderConfig>,
    market: Arc<dyn MarketData>,
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
}

impl MultiSymbolMonitor {
    pub fn new(
        config: Arc<TraderConfig>,
        market: Arc<dyn MarketData>,
        broker: Arc<dyn Broker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            market,
            broker,
            notifier,
        }
    }

    /// Run every symbol until `cancel` fires; returns the combined stats
    pub async fn run(&self, instruments: Vec<Instrument>, cancel: CancellationToken) -> PerformanceStats {
        let names: Vec<&str> = instruments.iter().map(|(s, _)| s.as_str()).collect();
        info!("Monitoring {} symbols: {}", names.len(), names.join(", "));

        let handles: Vec<_> = instruments
            .into_iter()
            .map(|(symbol, spec)| {
                let mut trader = InstrumentTrader::new(
                    symbol,
                    self.config.clone(),
                    self.market.clone(),
                    self.broker.clone(),
                    self.notifier.clone(),
                );
                if let Some(spec) = spec {
                    trader = trader.with_spec(spec);
                }
                tokio::spawn(trader.run(cancel.clone()))
            })
            .collect();

        let mut total = PerformanceStats::default();
        for result in join_all(handles).await {
            match result {
                Ok(stats) => total = total.merge(&stats),
                Err(e) => error!("Instrument task failed: {}", e),
            }
        }

        info!("All instruments stopped | {}", total);
        self.notifier.notify(Event::Summary(total.clone())).await;
        total
    }
}
