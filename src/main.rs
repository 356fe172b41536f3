use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pattern_delta_trader::backpack::{futures_symbol, BackpackClient, Credentials};
use pattern_delta_trader::config::{
    ExecutionMode, TraderConfig, DEFAULT_INTERVAL, DEFAULT_LEVERAGE,
    DEFAULT_MAX_POSITION_FRACTION,
};
use pattern_delta_trader::execution::PaperBroker;
use pattern_delta_trader::live::{resolve_instruments, MultiSymbolMonitor};
use pattern_delta_trader::notify::{LogNotifier, TelegramNotifier};
use pattern_delta_trader::ports::{Broker, MarketData, Notifier};
use pattern_delta_trader::trading_core::{DeltaSource, DeltaWindow, ThresholdMode};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Symbols to trade (comma-separated). Empty discovers PERP markets.
    #[arg(short, long, env = "TRADING_SYMBOL", default_value = "")]
    symbols: String,

    /// Bar interval: 1m, 5m, 15m, 1h, 4h or 1d
    #[arg(short, long, env = "TRADING_INTERVAL", default_value = DEFAULT_INTERVAL)]
    interval: String,

    /// Leverage applied to position sizing
    #[arg(long, env = "TRADING_LEVERAGE", default_value_t = DEFAULT_LEVERAGE)]
    leverage: f64,

    /// Fraction of balance committed per entry
    #[arg(long, env = "TRADING_MAX_POS_PCT", default_value_t = DEFAULT_MAX_POSITION_FRACTION)]
    max_position_fraction: f64,

    /// Cap on discovered symbols
    #[arg(long, env = "MAX_TRADING_SYMBOL", default_value_t = 20)]
    max_symbols: usize,

    /// Execution mode (paper or live)
    #[arg(short, long, env = "TRADING_MODE", default_value = "paper")]
    mode: ExecutionMode,

    /// Starting balance for paper trading
    #[arg(long, default_value_t = 1000.0)]
    paper_balance: f64,

    /// Stop loss in percent of entry
    #[arg(long, default_value_t = 0.25)]
    stop_loss_pct: f64,

    /// Take profit in percent of entry
    #[arg(long, default_value_t = 0.6)]
    take_profit_pct: f64,

    /// Trailing distance in percent of the best price
    #[arg(long, default_value_t = 0.2)]
    trailing_pct: f64,

    /// Disable the trailing stop
    #[arg(long)]
    no_trailing: bool,

    /// Bars a position may stay open
    #[arg(long, default_value_t = 12)]
    max_hold_bars: u32,

    /// Most positions open at once per symbol
    #[arg(long, default_value_t = 1)]
    max_positions: usize,

    /// Fee rate charged on entry and exit notional (0.0005 = 5 bps)
    #[arg(long, env = "TRADING_FEE_RATE", default_value_t = 0.0)]
    fee_rate: f64,

    /// Leave take-profit and stop-loss to the triggers attached to entries
    #[arg(long)]
    venue_exits: bool,

    /// Shadow / body ratio for hammers
    #[arg(long, default_value_t = 2.0)]
    hammer_ratio: f64,

    /// Prior bars scanned for breakouts
    #[arg(long, default_value_t = 5)]
    breakout_lookback: usize,

    /// Body / range ratio for momentum candles
    #[arg(long, default_value_t = 0.7)]
    momentum_ratio: f64,

    /// Prior bars averaged by the volume filter
    #[arg(long, default_value_t = 20)]
    volume_lookback: usize,

    /// Required multiple of the average volume
    #[arg(long, default_value_t = 1.25)]
    volume_multiplier: f64,

    /// Dynamic delta threshold multiplier
    #[arg(long, default_value_t = 0.8)]
    delta_multiplier: f64,

    /// Fixed delta threshold; overrides the dynamic threshold
    #[arg(long)]
    delta_threshold: Option<f64>,

    /// Delta source: candle (heuristic) or trades (public trade prints)
    #[arg(long, env = "DELTA_SOURCE", default_value = "candle")]
    delta_source: DeltaSource,

    /// Trades summed per bar by the trade-level delta
    #[arg(long, default_value_t = 40)]
    delta_window_ticks: usize,

    /// Sum trades within this many seconds of the bar close instead
    #[arg(long)]
    delta_window_secs: Option<i64>,

    /// Disable the EMA trend filter
    #[arg(long)]
    no_trend: bool,

    /// Long EMA period for the trend filter
    #[arg(long, default_value_t = 30)]
    trend_ema_period: usize,

    /// Seconds between latest-price polls
    #[arg(long, default_value_t = 10)]
    price_poll_secs: u64,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", default_value = "")]
    telegram_token: String,

    /// Telegram chat id
    #[arg(long, env = "TELEGRAM_CHAT_ID", default_value = "")]
    telegram_chat_id: String,
}

impl Args {
    fn trader_config(&self) -> TraderConfig {
        let mut config = TraderConfig {
            mode: self.mode,
            symbols: self
                .symbols
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(futures_symbol)
                .collect(),
            max_symbols: self.max_symbols,
            interval: self.interval.clone(),
            price_poll: Duration::from_secs(self.price_poll_secs.max(1)),
            leverage: self.leverage,
            max_position_fraction: self.max_position_fraction,
            paper_balance: self.paper_balance,
            local_exits: !self.venue_exits,
            ..TraderConfig::default()
        };
        config.lifecycle.stop_loss_pct = self.stop_loss_pct;
        config.lifecycle.take_profit_pct = self.take_profit_pct;
        config.lifecycle.trailing_pct = self.trailing_pct;
        config.lifecycle.trailing_enabled = !self.no_trailing;
        config.lifecycle.max_hold_bars = self.max_hold_bars;
        config.lifecycle.max_concurrent_positions = self.max_positions;
        config.lifecycle.fee_rate = self.fee_rate.max(0.0);

        let strategy = &mut config.strategy;
        strategy.pattern.hammer_ratio = self.hammer_ratio;
        strategy.pattern.breakout_lookback = self.breakout_lookback;
        strategy.pattern.momentum_ratio = self.momentum_ratio;
        strategy.volume.lookback = self.volume_lookback;
        strategy.volume.multiplier = self.volume_multiplier;
        strategy.delta.mode = match self.delta_threshold {
            Some(threshold) => ThresholdMode::Absolute { threshold },
            None => ThresholdMode::Dynamic {
                multiplier: self.delta_multiplier,
                min_samples: 10,
            },
        };
        strategy.delta.source = self.delta_source;
        strategy.delta.window = match self.delta_window_secs {
            Some(secs) => DeltaWindow::Seconds(secs.max(1)),
            None => DeltaWindow::Ticks(self.delta_window_ticks.max(1)),
        };
        strategy.trend_enabled = !self.no_trend;
        strategy.trend_ema_period = self.trend_ema_period.max(1);
        config.normalized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pattern_delta_trader=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(args.trader_config());

    info!("Starting pattern/volume/delta trader");
    info!("Mode: {}", config.mode);
    info!("Interval: {}", config.interval);
    info!(
        "Sizing: leverage {}x, {:.1}% of balance per entry",
        config.leverage,
        config.max_position_fraction * 100.0
    );
    info!(
        "Exits: SL {}% | TP {}% | trailing {} | max hold {} bars",
        config.lifecycle.stop_loss_pct,
        config.lifecycle.take_profit_pct,
        if config.lifecycle.trailing_enabled {
            format!("{}%", config.lifecycle.trailing_pct)
        } else {
            "off".to_string()
        },
        config.lifecycle.max_hold_bars
    );

    info!(
        "Delta: {:?} ({:?}) | exits {}",
        config.strategy.delta.source,
        config.strategy.delta.window,
        if config.local_exits { "closed by trader" } else { "venue triggers" }
    );

    let client = BackpackClient::from_env().context("Failed to build exchange client")?;
    let client = match config.mode {
        ExecutionMode::Paper => client,
        ExecutionMode::Live => client.with_credentials(
            Credentials::from_env().context("Live mode needs Backpack API credentials")?,
        ),
    };
    let client = Arc::new(client);
    let market: Arc<dyn MarketData> = client.clone();

    let broker: Arc<dyn Broker> = match config.mode {
        ExecutionMode::Paper => Arc::new(PaperBroker::new(market.clone(), config.paper_balance)),
        ExecutionMode::Live => {
            let leverage = config.leverage.round() as u32;
            if leverage > 1 {
                if let Err(e) = client.set_leverage(leverage).await {
                    warn!("Failed to set leverage to {}x: {:#}", leverage, e);
                }
            }
            client.clone()
        }
    };

    let notifier: Arc<dyn Notifier> =
        match TelegramNotifier::new(&args.telegram_token, &args.telegram_chat_id)? {
            Some(telegram) => {
                info!("Telegram notifications enabled");
                Arc::new(telegram)
            }
            None => Arc::new(LogNotifier),
        };

    let instruments = resolve_instruments(&config, &client).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
        shutdown.cancel();
    });

    let monitor = MultiSymbolMonitor::new(config.clone(), market, broker, notifier);
    let stats = monitor.run(instruments, cancel).await;

    info!("Final: {}", stats);
    Ok(())
}
