//! Telegram Bot API notifier

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::ports::{Event, Notifier};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Sends events to a Telegram chat as HTML messages
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// `None` when either the token or the chat id is empty
    pub fn new(token: &str, chat_id: &str) -> Result<Option<Self>> {
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return Ok(None);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Some(Self {
            client,
            token: token.trim().to_string(),
            chat_id: chat_id.trim().to_string(),
        }))
    }

    pub async fn send_message(&self, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
        };
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", API_BASE, self.token))
            .json(&body)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram sendMessage failed ({}): {}", status, body));
        }
        debug!("Telegram message delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: Event) {
        let this = self.clone();
        let text = event.to_html();
        tokio::spawn(async move {
            if let Err(e) = this.send_message(&text).await {
                warn!("Telegram notification failed: {:#}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_credentials() {
        assert!(TelegramNotifier::new("", "123").unwrap().is_none());
        assert!(TelegramNotifier::new("token", "  ").unwrap().is_none());
        assert!(TelegramNotifier::new("token", "123").unwrap().is_some());
    }
}
