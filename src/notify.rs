//! Message delivery to watcher chats.

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::warn;

/// Outcome of a delivery attempt. An unreachable chat is an expected state
/// (bot removed, chat deleted) and must never abort a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Unreachable,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<Delivery>;
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: &str, text: &str) -> Result<Delivery> {
        let Ok(id) = chat_id.parse::<i64>() else {
            warn!(chat_id, "chat_id is not numeric; treating as unreachable");
            return Ok(Delivery::Unreachable);
        };
        match self.bot.send_message(ChatId(id), text).await {
            Ok(_) => Ok(Delivery::Sent),
            // The chat no longer exists or the bot was kicked.
            Err(RequestError::Api(err)) => {
                warn!(chat_id, ?err, "chat unreachable");
                Ok(Delivery::Unreachable)
            }
            Err(err) => Err(err).context("telegram send failed"),
        }
    }
}
