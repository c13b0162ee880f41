//! Telegram side: message formatting, the bot dispatcher and the
//! [`Notifier`] used by the outbox worker.
pub mod format;
pub mod handlers;

use crate::db::{self, Pool};
use crate::model::Order;
use crate::orders;
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, ParseMode};

/// Sends HTML messages to Telegram chats.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_html(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct BotNotifier {
    bot: Bot,
}

impl BotNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for BotNotifier {
    async fn send_html(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<()> {
        let mut req = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(kb) = keyboard {
            req = req.reply_markup(kb);
        }
        req.await?;
        Ok(())
    }
}

/// Admin notice for one order, ready to send or to replace an older one.
pub struct RenderedOrder {
    pub order: Order,
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

pub async fn render_order(pool: &Pool, order_id: i64, currency: &str) -> Result<Option<RenderedOrder>> {
    let Some(full) = orders::get(pool, order_id).await? else {
        return Ok(None);
    };
    let city = db::get_city(pool, full.order.city_id)
        .await?
        .map(|c| c.name)
        .unwrap_or_default();
    let text = format::format_new_order(&full.order, &full.items, &city, currency);
    let keyboard = format::order_keyboard(&full.order);
    Ok(Some(RenderedOrder {
        order: full.order,
        text,
        keyboard,
    }))
}
