//! Event notification
//!
//! # Environment Variables
//!
//! - `TELEGRAM_BOT_TOKEN` - Bot token; Telegram is disabled when empty
//! - `TELEGRAM_CHAT_ID` - Destination chat

mod telegram;

use async_trait::async_trait;
use tracing::info;

use crate::ports::{Event, Notifier};

pub use telegram::TelegramNotifier;

/// Writes events to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: Event) {
        match &event {
            Event::Entered(p) => info!(
                "EVENT entered {} {} @ {:.6}",
                p.direction, p.instrument, p.entry_price
            ),
            Event::Exited(p) => info!(
                "EVENT exited {} {} PnL {:.6}",
                p.direction, p.instrument, p.realized_pnl
            ),
            other => info!("EVENT {:?}", other),
        }
    }
}
