//! Per-instrument trading unit
//!
//! One `InstrumentTrader` owns the signal engine and position book of a
//! single instrument. Its run loop is the only writer; a ticker task feeds
//! it latest prices over a channel.
//!
//! Closed bars advance held positions (and may time them out); price ticks
//! between bars only check take-profit, trailing and stop levels. A
//! triggered exit is finalised in the book only after the venue has
//! acknowledged the close, and is retried on the next bar or tick otherwise.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backpack::quote_asset;
use crate::config::TraderConfig;
use crate::ports::{Broker, Event, MarketData, Notifier, OrderRequest, OrderSide, OrderType};
use crate::trading_core::indicators::EMA_SHORT_PERIOD;
use crate::trading_core::sizing::{
    compute_quantity, floor_to_step, floor_to_tick, protective_levels, InstrumentSpec,
};
use crate::trading_core::{
    DeltaEstimator, EmaMacdRsiCalculator, Evaluation, ExitReason, IndicatorCalculator,
    PerformanceStats, PositionBook, PositionUpdate, SignalEngine,
};
use crate::types::{Direction, MarketSnapshot};

pub struct InstrumentTrader {
    instrument: String,
    config: Arc<TraderConfig>,
    market: Arc<dyn MarketData>,
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
    calculator: Box<dyn IndicatorCalculator>,
    estimator: Box<dyn DeltaEstimator>,
    engine: SignalEngine,
    book: PositionBook,
    spec: Option<InstrumentSpec>,
    last_bar_end: Option<DateTime<Utc>>,
    last_trade_time: Option<DateTime<Utc>>,
    last_price: Option<f64>,
}

impl InstrumentTrader {
    pub fn new(
        instrument: impl Into<String>,
        config: Arc<TraderConfig>,
        market: Arc<dyn MarketData>,
        broker: Arc<dyn Broker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            engine: SignalEngine::new(config.strategy.clone()),
            book: PositionBook::new(config.lifecycle.clone()),
            calculator: Box::new(EmaMacdRsiCalculator::new(
                EMA_SHORT_PERIOD,
                config.strategy.trend_ema_period,
            )),
            estimator: config.strategy.delta.estimator(),
            config,
            market,
            broker,
            notifier,
            spec: None,
            last_bar_end: None,
            last_trade_time: None,
            last_price: None,
        }
    }

    pub fn with_delta_estimator(mut self, estimator: Box<dyn DeltaEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_indicator_calculator(mut self, calculator: Box<dyn IndicatorCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_spec(mut self, spec: InstrumentSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn stats(&self) -> PerformanceStats {
        self.book.stats()
    }

    /// Fetch bars, feed every new closed bar to the engine and act on the
    /// newest one. Returns `None` when there was no new bar.
    pub async fn poll_bars(&mut self) -> Result<Option<Evaluation>> {
        let bars = self
            .market
            .recent_bars(&self.instrument, &self.config.interval, self.config.bars_per_fetch)
            .await
            .with_context(|| format!("Failed to fetch bars for {}", self.instrument))?;

        let indicators = self.calculator.compute(&bars);
        let now = Utc::now();

        let fresh: Vec<MarketSnapshot> = bars
            .into_iter()
            .zip(indicators)
            .filter(|(bar, _)| bar.end_time <= now)
            .filter(|(bar, _)| self.last_bar_end.map_or(true, |last| bar.end_time > last))
            .filter_map(|(bar, ind)| match ind {
                Some(ind) if bar.is_valid() => Some(MarketSnapshot::new(bar, ind)),
                Some(_) => {
                    warn!("{} skipping malformed bar ending {}", self.instrument, bar.end_time);
                    None
                }
                None => None,
            })
            .collect();

        if fresh.is_empty() {
            debug!("{} no new closed bars", self.instrument);
            return Ok(None);
        }

        if self.estimator.wants_trades() {
            self.feed_trades().await;
        }

        let mut evaluation = None;
        for snapshot in fresh {
            self.last_bar_end = Some(snapshot.bar.end_time);
            self.last_price = Some(snapshot.bar.close);

            // positions opened on this poll are only advanced by later bars
            let updates = self.book.on_bar(snapshot.bar.close);
            self.apply_updates(updates).await;

            let sample = self.estimator.sample(&snapshot.bar);
            evaluation = Some(self.engine.on_bar(snapshot, sample));
        }

        let Some(evaluation) = evaluation else {
            return Ok(None);
        };

        if let Some(direction) = evaluation.signal.direction() {
            if self.book.can_open() {
                self.enter(direction).await;
            } else {
                debug!(
                    "{} {} ignored: {} position(s) open",
                    self.instrument,
                    evaluation.signal,
                    self.book.open_count()
                );
            }
        }

        self.log_status(&evaluation);
        Ok(Some(evaluation))
    }

    /// Size, route and record an entry at the latest close
    async fn enter(&mut self, direction: Direction) {
        let Some(price) = self.last_price else {
            return;
        };

        let balance = match self.broker.account_balance(&quote_asset(&self.instrument)).await {
            Ok(b) => b,
            Err(e) => {
                warn!("{} balance query failed: {:#}", self.instrument, e);
                return;
            }
        };

        let quantity = match compute_quantity(
            balance,
            self.config.leverage,
            self.config.max_position_fraction,
            price,
        ) {
            Ok(q) => match self.spec {
                Some(spec) => floor_to_step(q, spec.step_size, spec.min_quantity),
                None => q,
            },
            Err(e) => {
                warn!("{} entry skipped: {}", self.instrument, e);
                return;
            }
        };

        let (mut stop_loss, mut take_profit) = protective_levels(
            direction,
            price,
            self.config.lifecycle.stop_loss_pct,
            self.config.lifecycle.take_profit_pct,
        );
        if let Some(spec) = self.spec {
            stop_loss = floor_to_tick(stop_loss, spec.tick_size);
            take_profit = floor_to_tick(take_profit, spec.tick_size);
        }

        let order = OrderRequest {
            instrument: self.instrument.clone(),
            side: OrderSide::opening(direction),
            order_type: OrderType::Market,
            quantity,
            stop_loss_trigger: Some(stop_loss),
            take_profit_trigger: Some(take_profit),
        };

        let order_id = match self.broker.place_order(order).await {
            Ok(id) => id,
            Err(e) => {
                error!("{} order placement failed: {:#}", self.instrument, e);
                self.notifier
                    .notify(Event::Error {
                        instrument: self.instrument.clone(),
                        message: format!("Order placement failed: {:#}", e),
                    })
                    .await;
                return;
            }
        };

        match self.book.open(&self.instrument, direction, price, quantity, Utc::now()) {
            Ok(position) => {
                info!("{} order {} filled, position {}", self.instrument, order_id, position.id);
                let event = Event::Entered(position.clone());
                self.notifier.notify(event).await;
            }
            Err(e) => warn!("{} position not recorded: {}", self.instrument, e),
        }
    }

    /// Pull public trades newer than the last one seen into the estimator
    async fn feed_trades(&mut self) {
        let trades = match self
            .market
            .recent_trades(&self.instrument, TRADE_FETCH_LIMIT)
            .await
        {
            Ok(trades) => trades,
            Err(e) => {
                warn!("{} trade fetch failed: {:#}", self.instrument, e);
                return;
            }
        };

        let mut recorded = 0;
        for trade in trades {
            if self.last_trade_time.is_some_and(|last| trade.ts_event <= last) {
                continue;
            }
            self.last_trade_time = Some(trade.ts_event);
            self.estimator.record_trade(trade);
            recorded += 1;
        }
        debug!("{} recorded {} new trades", self.instrument, recorded);
    }

    /// Check take-profit, trailing and stop levels against a price tick
    pub async fn on_tick(&mut self, price: f64) {
        self.last_price = Some(price);
        if let Err(e) = self.broker.observe_price(&self.instrument, price).await {
            warn!("{} broker price update failed: {:#}", self.instrument, e);
        }
        let updates = self.book.on_tick(price);
        self.apply_updates(updates).await;
    }

    async fn apply_updates(&mut self, updates: Vec<PositionUpdate>) {
        for update in updates {
            match update {
                PositionUpdate::TrailingArmed { id, stop } => {
                    info!("{} trailing stop armed for {} at {:.6}", self.instrument, id, stop);
                }
                PositionUpdate::TrailingRaised { id, stop } => {
                    debug!("{} trailing stop for {} moved to {:.6}", self.instrument, id, stop);
                }
                PositionUpdate::ExitTriggered { id, price, reason } => {
                    self.exit(id, price, reason).await;
                }
            }
        }
    }

    /// Flatten on the venue, then record the exit. On failure the position
    /// stays open with its exit pending.
    async fn exit(&mut self, id: Uuid, price: f64, reason: ExitReason) {
        // an earlier flatten in this batch may already have closed it
        if !self.book.get(id).is_some_and(|p| p.is_open()) {
            return;
        }

        let venue_handles_it = !self.config.local_exits
            && matches!(reason, ExitReason::TakeProfit | ExitReason::StopLoss);
        if venue_handles_it {
            self.record_exit(id, price).await;
            return;
        }

        if let Err(e) = self.broker.close_position(&self.instrument).await {
            warn!(
                "{} {} close failed, position kept open for retry: {:#}",
                self.instrument, reason, e
            );
            return;
        }

        // the venue flattens the whole instrument
        let flattened: Vec<Uuid> = self.book.open_positions().iter().map(|p| p.id).collect();
        for id in flattened {
            self.record_exit(id, price).await;
        }
    }

    async fn record_exit(&mut self, id: Uuid, price: f64) {
        match self.book.confirm_exit(id, price, Utc::now()) {
            Ok(position) => self.notifier.notify(Event::Exited(position)).await,
            Err(e) => warn!("{} exit not recorded: {}", self.instrument, e),
        }
    }

    fn log_status(&self, evaluation: &Evaluation) {
        let position = match self.book.open_positions().first() {
            Some(p) => format!(
                "{} @ {:.6} (uPnL {:.6}, {} bars)",
                p.direction,
                p.entry_price,
                p.unrealized_pnl(self.last_price.unwrap_or(p.entry_price)),
                p.bars_held
            ),
            None => "FLAT".to_string(),
        };
        info!(
            "{} | price {:.6} | pattern {} | delta {:.2} | signal {} | {} | position {} | PnL {:.6}",
            self.instrument,
            self.last_price.unwrap_or_default(),
            evaluation.pattern.name(),
            evaluation.delta.map(|d| d.value).unwrap_or_default(),
            evaluation.signal,
            evaluation
                .rejection
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "accepted".to_string()),
            position,
            self.book.stats().total_pnl
        );
    }

    /// Run until cancelled; returns the instrument's final statistics
    pub async fn run(mut self, cancel: CancellationToken) -> PerformanceStats {
        info!("Starting {} ({})", self.instrument, self.config.interval);
        self.notifier
            .notify(Event::Started {
                instrument: self.instrument.clone(),
                interval: self.config.interval.clone(),
            })
            .await;

        let (price_tx, mut price_rx) = mpsc::channel::<f64>(16);
        let ticker = spawn_price_ticker(
            self.instrument.clone(),
            self.market.clone(),
            self.config.price_poll,
            price_tx,
            cancel.clone(),
        );

        let mut bar_timer = tokio::time::interval(bar_poll_period(&self.config));
        bar_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = bar_timer.tick() => {
                    if let Err(e) = self.poll_bars().await {
                        error!("{} bar cycle failed: {:#}", self.instrument, e);
                    }
                }
                Some(price) = price_rx.recv() => {
                    self.on_tick(price).await;
                }
            }
        }

        ticker.abort();
        let stats = self.stats();
        info!("Stopped {} | {}", self.instrument, stats);
        stats
    }
}

/// Public trades requested per bar when delta is trade-level
const TRADE_FETCH_LIMIT: usize = 1000;

/// Poll bars a few times per bar period so a closed bar is seen promptly
fn bar_poll_period(config: &TraderConfig) -> Duration {
    let period = config.bar_period();
    (period / 6).max(Duration::from_secs(5))
}

fn spawn_price_ticker(
    instrument: String,
    market: Arc<dyn MarketData>,
    period: Duration,
    tx: mpsc::Sender<f64>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match market.latest_price(&instrument).await {
                        Ok(price) if price.is_finite() && price > 0.0 => {
                            if tx.send(price).await.is_err() {
                                break;
                            }
                        }
                        Ok(price) => warn!("{} ignoring price {}", instrument, price),
                        Err(e) => warn!("{} price fetch failed: {:#}", instrument, e),
                    }
                }
            }
        }
    })
}

impl std::fmt::Debug for InstrumentTrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentTrader")
            .field("instrument", &self.instrument)
            .field("last_bar_end", &self.last_bar_end)
            .field("open_positions", &self.book.open_count())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::ports::OrderId;
    use crate::trading_core::Trade;
    use crate::types::Bar;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeMarket {
        pub bars: Mutex<Vec<Bar>>,
        pub price: Mutex<f64>,
        pub trades: Mutex<Vec<Trade>>,
    }

    #[async_trait::async_trait]
    impl MarketData for FakeMarket {
        async fn recent_bars(&self, _: &str, _: &str, _: usize) -> Result<Vec<Bar>> {
            Ok(self.bars.lock().unwrap().clone())
        }

        async fn latest_price(&self, _: &str) -> Result<f64> {
            Ok(*self.price.lock().unwrap())
        }

        async fn recent_trades(&self, _: &str, _: usize) -> Result<Vec<Trade>> {
            Ok(self.trades.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    pub struct FakeBroker {
        pub fail_orders: bool,
        pub fail_closes: AtomicBool,
        pub orders: Mutex<Vec<OrderRequest>>,
        /// Acknowledged closes only
        pub closes: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Broker for FakeBroker {
        async fn account_balance(&self, _: &str) -> Result<f64> {
            Ok(1000.0)
        }

        async fn place_order(&self, order: OrderRequest) -> Result<OrderId> {
            if self.fail_orders {
                return Err(anyhow!("exchange unavailable"));
            }
            self.orders.lock().unwrap().push(order);
            Ok(OrderId("order-1".into()))
        }

        async fn close_position(&self, instrument: &str) -> Result<OrderId> {
            if self.fail_closes.load(Ordering::SeqCst) {
                return Err(anyhow!("close rejected"));
            }
            self.closes.lock().unwrap().push(instrument.to_string());
            Ok(OrderId("close-1".into()))
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub events: Mutex<Vec<Event>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::trading_core::{DeltaSource, DeltaWindow, ExitReason, Side, ThresholdMode, Trade};
    use crate::types::test_support::bar;
    use crate::types::{Bar, Signal};
    use std::sync::atomic::Ordering;

    /// 38 flat bars, a bearish bar, then a high-volume bullish engulfing bar
    fn engulfing_series() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..38).map(|i| bar(i, 10.0, 10.2, 9.8, 10.0, 100.0)).collect();
        bars.push(bar(38, 10.0, 10.1, 8.9, 9.0, 100.0));
        bars.push(bar(39, 8.5, 11.2, 8.4, 11.0, 300.0));
        bars
    }

    fn base_config() -> TraderConfig {
        let mut config = TraderConfig::default();
        config.symbols = vec!["SOL_USDC_PERP".into()];
        config.strategy.delta.mode = ThresholdMode::Absolute { threshold: 100.0 };
        config
    }

    fn flat_bar(i: i64) -> Bar {
        bar(i, 11.0, 11.02, 10.98, 11.0, 100.0)
    }

    struct Harness {
        market: Arc<FakeMarket>,
        broker: Arc<FakeBroker>,
        notifier: Arc<RecordingNotifier>,
        trader: InstrumentTrader,
    }

    fn harness(broker: FakeBroker) -> Harness {
        harness_with(broker, base_config())
    }

    fn harness_with(broker: FakeBroker, config: TraderConfig) -> Harness {
        let market = Arc::new(FakeMarket::default());
        *market.bars.lock().unwrap() = engulfing_series();
        *market.price.lock().unwrap() = 11.0;
        let broker = Arc::new(broker);
        let notifier = Arc::new(RecordingNotifier::default());
        let trader = InstrumentTrader::new(
            "SOL_USDC_PERP",
            Arc::new(config),
            market.clone(),
            broker.clone(),
            notifier.clone(),
        );
        Harness {
            market,
            broker,
            notifier,
            trader,
        }
    }

    #[tokio::test]
    async fn test_engulfing_series_opens_long() {
        let mut h = harness(FakeBroker::default());
        let evaluation = h.trader.poll_bars().await.unwrap().unwrap();
        assert_eq!(evaluation.signal, Signal::LongEntry);

        let orders = h.broker.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        // 1000 * 1 * 0.02 / 11
        assert!((orders[0].quantity - 20.0 / 11.0).abs() < 1e-9);
        assert!((orders[0].stop_loss_trigger.unwrap() - 11.0 * 0.9975).abs() < 1e-9);

        assert_eq!(h.trader.book().open_count(), 1);
        let events = h.notifier.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::Entered(_))));
    }

    #[tokio::test]
    async fn test_warm_up_bars_are_not_eligible() {
        let mut h = harness(FakeBroker::default());
        h.trader.poll_bars().await.unwrap();
        // bars 0..=28 have no indicator set
        assert_eq!(h.trader.engine().snapshots().len(), 11);
    }

    #[tokio::test]
    async fn test_duplicate_bars_are_dropped() {
        let mut h = harness(FakeBroker::default());
        h.trader.poll_bars().await.unwrap();
        let seen = h.trader.engine().snapshots().len();

        assert!(h.trader.poll_bars().await.unwrap().is_none());
        assert_eq!(h.trader.engine().snapshots().len(), seen);
        assert_eq!(h.broker.orders.lock().unwrap().len(), 1);

        h.market
            .bars
            .lock()
            .unwrap()
            .push(bar(40, 11.0, 11.1, 10.9, 11.0, 100.0));
        assert!(h.trader.poll_bars().await.unwrap().is_some());
        assert_eq!(h.trader.engine().snapshots().len(), seen + 1);
    }

    #[tokio::test]
    async fn test_failed_order_leaves_book_flat() {
        let mut h = harness(FakeBroker {
            fail_orders: true,
            ..Default::default()
        });
        let evaluation = h.trader.poll_bars().await.unwrap().unwrap();
        assert_eq!(evaluation.signal, Signal::LongEntry);
        assert_eq!(h.trader.book().open_count(), 0);
        let events = h.notifier.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::Error { .. })));
    }

    #[tokio::test]
    async fn test_take_profit_closes_on_exchange() {
        let mut h = harness(FakeBroker::default());
        h.trader.poll_bars().await.unwrap();

        h.trader.on_tick(11.0).await;
        assert_eq!(h.trader.book().open_count(), 1);

        h.trader.on_tick(11.1).await;
        assert_eq!(h.trader.book().open_count(), 0);
        assert_eq!(*h.broker.closes.lock().unwrap(), vec!["SOL_USDC_PERP".to_string()]);

        let stats = h.trader.stats();
        assert_eq!(stats.closed_positions, 1);
        assert!(stats.total_pnl > 0.0);
        let events = h.notifier.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::Exited(_))));
    }

    #[tokio::test]
    async fn test_hold_time_counts_closed_bars_not_ticks() {
        let mut h = harness(FakeBroker::default());
        h.trader.poll_bars().await.unwrap();

        for _ in 0..12 {
            h.trader.on_tick(11.0).await;
        }
        assert_eq!(h.trader.book().open_count(), 1);
        assert_eq!(h.trader.book().open_positions()[0].bars_held, 0);

        h.market.bars.lock().unwrap().extend((40..52).map(flat_bar));
        h.trader.poll_bars().await.unwrap();

        let exited: Vec<_> = h
            .notifier
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Exited(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].exit_reason, Some(ExitReason::Timeout));
        assert_eq!(exited[0].bars_held, 12);
        assert_eq!(h.broker.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_close_keeps_position_until_retry_succeeds() {
        let broker = FakeBroker::default();
        broker.fail_closes.store(true, Ordering::SeqCst);
        let mut h = harness(broker);
        h.trader.poll_bars().await.unwrap();
        let id = h.trader.book().open_positions()[0].id;

        // stop loss triggers but the venue rejects the close
        h.trader.on_tick(10.9).await;
        assert_eq!(h.trader.book().open_count(), 1);
        assert!(!h.trader.book().can_open());
        assert_eq!(h.trader.book().get(id).unwrap().pending_exit, Some(ExitReason::StopLoss));

        // a new bar retries the exit and cannot stack a second entry
        h.market.bars.lock().unwrap().push(flat_bar(40));
        h.trader.poll_bars().await.unwrap();
        assert_eq!(h.trader.book().open_count(), 1);
        assert_eq!(h.broker.orders.lock().unwrap().len(), 1);
        assert!(h.broker.closes.lock().unwrap().is_empty());
        assert!(!h
            .notifier
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::Exited(_))));

        h.broker.fail_closes.store(false, Ordering::SeqCst);
        h.trader.on_tick(10.95).await;
        assert_eq!(h.trader.book().open_count(), 0);
        assert_eq!(h.broker.closes.lock().unwrap().len(), 1);
        let closed = h.trader.book().get(id).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(closed.exit_price, Some(10.95));
    }

    #[tokio::test]
    async fn test_venue_triggers_handle_target_without_local_close() {
        let mut config = base_config();
        config.local_exits = false;
        let mut h = harness_with(FakeBroker::default(), config);
        h.trader.poll_bars().await.unwrap();

        h.trader.on_tick(11.1).await;
        assert_eq!(h.trader.book().open_count(), 0);
        assert!(h.broker.closes.lock().unwrap().is_empty());
        assert_eq!(h.trader.stats().closed_positions, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_closed_even_with_venue_triggers() {
        let mut config = base_config();
        config.local_exits = false;
        let mut h = harness_with(FakeBroker::default(), config);
        h.trader.poll_bars().await.unwrap();

        h.market.bars.lock().unwrap().extend((40..52).map(flat_bar));
        h.trader.poll_bars().await.unwrap();
        assert_eq!(h.broker.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trade_level_delta_uses_public_trades() {
        let mut config = base_config();
        config.strategy.delta.source = DeltaSource::Trades;
        config.strategy.delta.window = DeltaWindow::Ticks(40);
        let mut h = harness_with(FakeBroker::default(), config);

        let ts = bar(39, 8.5, 11.2, 8.4, 11.0, 300.0).end_time - chrono::Duration::seconds(5);
        *h.market.trades.lock().unwrap() = vec![
            Trade::with_taker(ts, 10.9, 500.0, Side::Buy),
            Trade::with_taker(ts + chrono::Duration::milliseconds(1), 10.9, 100.0, Side::Sell),
            Trade::with_taker(ts + chrono::Duration::milliseconds(2), 11.0, 50.0, Side::Buy),
        ];

        let evaluation = h.trader.poll_bars().await.unwrap().unwrap();
        assert_eq!(evaluation.delta.map(|d| d.value), Some(450.0));
        assert_eq!(evaluation.signal, Signal::LongEntry);

        // the same prints are not recorded twice
        h.market.bars.lock().unwrap().push(flat_bar(40));
        h.trader.poll_bars().await.unwrap();
        assert_eq!(h.trader.engine().deltas().latest().map(|d| d.value), Some(450.0));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness(FakeBroker::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = h.trader.run(cancel).await;
        assert_eq!(stats.closed_positions, 0);
        let events = h.notifier.events.lock().unwrap();
        assert!(matches!(events[0], Event::Started { .. }));
    }
}
