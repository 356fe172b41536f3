//! Position lifecycle: Open → ExitPending → Closed
//!
//! The book owns every position of one instrument. Closed bars advance
//! `bars_held` and may time a position out. Price ticks between bars only
//! move the extremes, manage the trailing stop and check the price exits.
//! Exits are checked in priority order: take-profit, trailing stop, static
//! stop, timeout.
//!
//! A triggered exit is only an intent. The position stays open, and keeps
//! counting against the concurrency limit, until [`PositionBook::confirm_exit`]
//! is called once the venue has flattened it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::history::BoundedHistory;
use super::sizing::protective_levels;
use crate::types::Direction;

const CLOSED_HISTORY_CAPACITY: usize = 1000;

/// Profit needed to arm the trailing stop, as a fraction of the TP distance
const TRAILING_ACTIVATION: f64 = 0.5;

/// Exit and admission rules. Percentages are in percent (0.25 = 0.25%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_enabled: bool,
    pub trailing_pct: f64,
    pub max_hold_bars: u32,
    pub max_concurrent_positions: usize,
    /// Fee charged on entry and exit notional when the book closes a position
    pub fee_rate: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.25,
            take_profit_pct: 0.6,
            trailing_enabled: true,
            trailing_pct: 0.2,
            max_hold_bars: 12,
            max_concurrent_positions: 1,
            fee_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    TrailingStop,
    StopLoss,
    Timeout,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "take profit",
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::StopLoss => "stop loss",
            ExitReason::Timeout => "timeout",
            ExitReason::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_stop: f64,
    pub trailing_enabled: bool,
    pub trailing_pct: f64,
    pub max_hold_bars: u32,
    pub bars_held: u32,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    /// Exit triggered but not yet confirmed by the venue
    #[serde(default)]
    pub pending_exit: Option<ExitReason>,
    pub realized_pnl: f64,
    pub pnl_percent: f64,
    pub trading_fee: f64,
    pub funding_fee: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market PnL at `price`, before fees
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.direction.sign()
    }

    fn observe(&mut self, price: f64, trailing_allowed: bool) {
        self.highest_price = self.highest_price.max(price);
        self.lowest_price = self.lowest_price.min(price);

        if trailing_allowed {
            self.update_trailing(price);
        }
    }

    fn price_exit(&self, price: f64) -> Option<ExitReason> {
        let sign = self.direction.sign();
        if (price - self.take_profit) * sign >= 0.0 {
            Some(ExitReason::TakeProfit)
        } else if self.trailing_enabled && (self.trailing_stop - price) * sign >= 0.0 {
            Some(ExitReason::TrailingStop)
        } else if (self.stop_loss - price) * sign >= 0.0 {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }

    fn update_trailing(&mut self, price: f64) {
        let sign = self.direction.sign();
        let offset = self.trailing_pct / 100.0;
        let candidate = price * (1.0 - offset * sign);

        if !self.trailing_enabled {
            let profit = (price - self.entry_price) / self.entry_price * sign;
            let target = (self.take_profit - self.entry_price) / self.entry_price * sign;
            if profit >= target * TRAILING_ACTIVATION {
                self.trailing_enabled = true;
                self.trailing_stop = candidate;
                debug!(
                    "{} trailing stop armed at {:.6} (price {:.6})",
                    self.instrument, candidate, price
                );
            }
        } else if (candidate - self.trailing_stop) * sign > 0.0 {
            self.trailing_stop = candidate;
        }
    }
}

/// Exchange-reported or estimated costs of a round trip
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fees {
    pub trading: f64,
    pub funding: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("position {0} not found")]
    UnknownPosition(Uuid),
    #[error("position {0} is already closed")]
    AlreadyClosed(Uuid),
    #[error("{open} positions open, limit is {max}")]
    CapacityReached { open: usize, max: usize },
    #[error("invalid entry: price {price}, quantity {quantity}")]
    InvalidEntry { price: f64, quantity: f64 },
}

/// Aggregate results over the book
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_positions: usize,
    pub closed_positions: usize,
    pub open_positions: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    /// Percent of closed positions with positive PnL
    pub win_rate: f64,
    pub average_win: f64,
    /// Negative or zero
    pub average_loss: f64,
}

impl PerformanceStats {
    /// Combine per-instrument stats
    pub fn merge(&self, other: &PerformanceStats) -> PerformanceStats {
        let closed = self.closed_positions + other.closed_positions;
        let wins = self.wins + other.wins;
        let losses = self.losses + other.losses;
        let gross_win = self.average_win * self.wins as f64 + other.average_win * other.wins as f64;
        let gross_loss =
            self.average_loss * self.losses as f64 + other.average_loss * other.losses as f64;
        PerformanceStats {
            total_positions: self.total_positions + other.total_positions,
            closed_positions: closed,
            open_positions: self.open_positions + other.open_positions,
            wins,
            losses,
            total_pnl: self.total_pnl + other.total_pnl,
            win_rate: if closed > 0 { wins as f64 / closed as f64 * 100.0 } else { 0.0 },
            average_win: if wins > 0 { gross_win / wins as f64 } else { 0.0 },
            average_loss: if losses > 0 { gross_loss / losses as f64 } else { 0.0 },
        }
    }
}

impl std::fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Positions: {} ({} open, {} closed) | PnL: {:.4} | WR: {:.1}% | Avg win: {:.4} | Avg loss: {:.4}",
            self.total_positions,
            self.open_positions,
            self.closed_positions,
            self.total_pnl,
            self.win_rate,
            self.average_win,
            self.average_loss
        )
    }
}

/// What a bar or tick did to the book
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    TrailingArmed { id: Uuid, stop: f64 },
    TrailingRaised { id: Uuid, stop: f64 },
    /// The position should be flattened at `price`. Repeated on every
    /// update until the exit is confirmed.
    ExitTriggered { id: Uuid, price: f64, reason: ExitReason },
}

/// Open and closed positions for one instrument
pub struct PositionBook {
    config: LifecycleConfig,
    open: Vec<Position>,
    closed: BoundedHistory<Position>,
    closed_count: usize,
    wins: usize,
    losses: usize,
    gross_win: f64,
    gross_loss: f64,
    realized_pnl: f64,
}

impl PositionBook {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            open: Vec::new(),
            closed: BoundedHistory::new(CLOSED_HISTORY_CAPACITY),
            closed_count: 0,
            wins: 0,
            losses: 0,
            gross_win: 0.0,
            gross_loss: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn can_open(&self) -> bool {
        self.open.len() < self.config.max_concurrent_positions
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn closed_positions(&self) -> impl Iterator<Item = &Position> {
        self.closed.iter()
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.open
            .iter()
            .find(|p| p.id == id)
            .or_else(|| self.closed.iter().find(|p| p.id == id))
    }

    /// Open a position with SL/TP derived from the configured percentages
    pub fn open(
        &mut self,
        instrument: &str,
        direction: Direction,
        entry_price: f64,
        quantity: f64,
        entry_time: DateTime<Utc>,
    ) -> Result<&Position, LifecycleError> {
        if !self.can_open() {
            return Err(LifecycleError::CapacityReached {
                open: self.open.len(),
                max: self.config.max_concurrent_positions,
            });
        }
        if !(entry_price > 0.0 && entry_price.is_finite() && quantity > 0.0 && quantity.is_finite()) {
            return Err(LifecycleError::InvalidEntry {
                price: entry_price,
                quantity,
            });
        }

        let (stop_loss, take_profit) = protective_levels(
            direction,
            entry_price,
            self.config.stop_loss_pct,
            self.config.take_profit_pct,
        );

        let position = Position {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            direction,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            trailing_stop: stop_loss,
            trailing_enabled: false,
            trailing_pct: self.config.trailing_pct,
            max_hold_bars: self.config.max_hold_bars,
            bars_held: 0,
            highest_price: entry_price,
            lowest_price: entry_price,
            status: PositionStatus::Open,
            exit_price: None,
            exit_reason: None,
            pending_exit: None,
            realized_pnl: 0.0,
            pnl_percent: 0.0,
            trading_fee: 0.0,
            funding_fee: 0.0,
            entry_time,
            exit_time: None,
        };

        info!(
            "OPEN {} {} @ {:.6} | qty {:.6} | SL {:.6} | TP {:.6}",
            direction, instrument, entry_price, quantity, stop_loss, take_profit
        );
        let index = self.open.len();
        self.open.push(position);
        Ok(&self.open[index])
    }

    /// Advance every open position by one closed bar
    pub fn on_bar(&mut self, close: f64) -> Vec<PositionUpdate> {
        self.advance(close, true)
    }

    /// Check price exits against a tick between bars. `bars_held` is untouched.
    pub fn on_tick(&mut self, price: f64) -> Vec<PositionUpdate> {
        self.advance(price, false)
    }

    fn advance(&mut self, price: f64, closed_bar: bool) -> Vec<PositionUpdate> {
        if !price.is_finite() || price <= 0.0 {
            return Vec::new();
        }

        let trailing_allowed = self.config.trailing_enabled;
        let mut updates = Vec::new();
        for position in &mut self.open {
            if closed_bar {
                position.bars_held += 1;
            }
            let was_armed = position.trailing_enabled;
            let prior_stop = position.trailing_stop;
            position.observe(price, trailing_allowed);

            if position.trailing_enabled && !was_armed {
                updates.push(PositionUpdate::TrailingArmed {
                    id: position.id,
                    stop: position.trailing_stop,
                });
            } else if was_armed && position.trailing_stop != prior_stop {
                updates.push(PositionUpdate::TrailingRaised {
                    id: position.id,
                    stop: position.trailing_stop,
                });
            }

            let exit = position.pending_exit.or_else(|| {
                position.price_exit(price).or_else(|| {
                    (closed_bar && position.bars_held >= position.max_hold_bars)
                        .then_some(ExitReason::Timeout)
                })
            });
            if let Some(reason) = exit {
                if position.pending_exit.is_none() {
                    debug!(
                        "{} {} exit triggered @ {:.6} ({})",
                        position.instrument, position.id, price, reason
                    );
                    position.pending_exit = Some(reason);
                }
                updates.push(PositionUpdate::ExitTriggered {
                    id: position.id,
                    price,
                    reason,
                });
            }
        }
        updates
    }

    /// Finalise a triggered exit once the venue has flattened the position.
    /// Fees are estimated from `fee_rate`.
    pub fn confirm_exit(
        &mut self,
        id: Uuid,
        exit_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Position, LifecycleError> {
        let reason = self
            .open
            .iter()
            .find(|p| p.id == id)
            .and_then(|p| p.pending_exit)
            .unwrap_or(ExitReason::Manual);
        let fees = self.estimated_fees(id, exit_price);
        self.close(id, exit_price, reason, fees, now)
    }

    /// Close an open position at `exit_price`
    pub fn close(
        &mut self,
        id: Uuid,
        exit_price: f64,
        reason: ExitReason,
        fees: Fees,
        now: DateTime<Utc>,
    ) -> Result<Position, LifecycleError> {
        let Some(index) = self.open.iter().position(|p| p.id == id) else {
            if self.closed.iter().any(|p| p.id == id) {
                return Err(LifecycleError::AlreadyClosed(id));
            }
            return Err(LifecycleError::UnknownPosition(id));
        };

        let mut position = self.open.remove(index);
        position.pending_exit = None;
        let pnl = position.unrealized_pnl(exit_price) - fees.trading - fees.funding;
        let notional = position.entry_price * position.quantity;

        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_reason = Some(reason);
        position.exit_time = Some(now);
        position.trading_fee = fees.trading;
        position.funding_fee = fees.funding;
        position.realized_pnl = pnl;
        position.pnl_percent = if notional != 0.0 { pnl / notional * 100.0 } else { 0.0 };

        self.closed_count += 1;
        self.realized_pnl += pnl;
        if pnl > 0.0 {
            self.wins += 1;
            self.gross_win += pnl;
        } else if pnl < 0.0 {
            self.losses += 1;
            self.gross_loss += pnl;
        }

        info!(
            "CLOSE {} {} @ {:.6} | {} | PnL {:.6} ({:.3}%) | held {} bars",
            position.direction,
            position.instrument,
            exit_price,
            reason,
            pnl,
            position.pnl_percent,
            position.bars_held
        );

        self.closed.push(position.clone());
        Ok(position)
    }

    pub fn stats(&self) -> PerformanceStats {
        let closed = self.closed_count;
        PerformanceStats {
            total_positions: closed + self.open.len(),
            closed_positions: closed,
            open_positions: self.open.len(),
            wins: self.wins,
            losses: self.losses,
            total_pnl: self.realized_pnl,
            win_rate: if closed > 0 { self.wins as f64 / closed as f64 * 100.0 } else { 0.0 },
            average_win: if self.wins > 0 { self.gross_win / self.wins as f64 } else { 0.0 },
            average_loss: if self.losses > 0 { self.gross_loss / self.losses as f64 } else { 0.0 },
        }
    }

    fn estimated_fees(&self, id: Uuid, exit_price: f64) -> Fees {
        let Some(position) = self.open.iter().find(|p| p.id == id) else {
            return Fees::default();
        };
        let turnover = (position.entry_price + exit_price) * position.quantity;
        Fees {
            trading: turnover * self.config.fee_rate,
            funding: 0.0,
        }
    }
}
