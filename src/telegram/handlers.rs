use super::render_order;
use crate::config::Config;
use crate::db::{self, Pool};
use crate::import::{self, ImportOptions};
use crate::orders::{self, OrderError};
use crate::telegram::format;
use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{Document, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, WebAppInfo};
use tracing::{info, instrument, warn};
use url::Url;

const IMPORT_EXTENSIONS: [&str; 4] = [".csv", ".tsv", ".txt", ".xlsx"];
const MAX_REPORTED_ERRORS: usize = 20;

pub fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

/// Run the bot until Ctrl-C.
pub async fn run(bot: Bot, pool: Pool, cfg: Arc<Config>) {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![pool, cfg])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// `/start@shop_bot payload` → `/start`.
fn command_of(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    first.split('@').next()
}

fn is_import_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMPORT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[instrument(skip_all)]
async fn handle_message(bot: Bot, msg: Message, pool: Pool, cfg: Arc<Config>) -> Result<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let tg_user_id = user.id.0 as i64;

    if let Some(doc) = msg.document() {
        return handle_document(&bot, &msg, &pool, &cfg, tg_user_id, doc).await;
    }

    match msg.text().and_then(command_of) {
        Some("/start") => {
            let url = Url::parse(&cfg.app.webapp_url).context("app.webapp_url is not a URL")?;
            let kb = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::web_app(
                "🛍 Open shop",
                WebAppInfo { url },
            )]]);
            bot.send_message(msg.chat.id, "Welcome! Tap the button below to open the shop.")
                .reply_markup(kb)
                .await?;
        }
        Some("/ping") => {
            bot.send_message(msg.chat.id, "PONG").await?;
        }
        Some("/import") => {
            if db::is_admin(&pool, tg_user_id).await? {
                bot.send_message(
                    msg.chat.id,
                    "Send a .csv or .xlsx price list as a document. Add the caption \"dry run\" to check it without saving.",
                )
                .await?;
            }
        }
        _ => {}
    }
    Ok(())
}

async fn handle_document(
    bot: &Bot,
    msg: &Message,
    pool: &Pool,
    cfg: &Config,
    tg_user_id: i64,
    doc: &Document,
) -> Result<()> {
    let file_name = doc.file_name.clone().unwrap_or_default();
    if !is_import_file(&file_name) {
        return Ok(());
    }
    if !db::is_admin(pool, tg_user_id).await? {
        bot.send_message(msg.chat.id, "Access denied.").await?;
        return Ok(());
    }
    if doc.file.size as usize > cfg.http.max_upload_bytes {
        bot.send_message(msg.chat.id, "The file is too large.").await?;
        return Ok(());
    }

    let bytes = download_file(bot, &doc.file.id).await?;
    let opts = ImportOptions {
        batch_size: cfg.import.batch_size,
        dry_run: msg
            .caption()
            .is_some_and(|c| c.to_lowercase().contains("dry")),
    };
    info!(tg_user_id, file = %file_name, size = bytes.len(), "import via bot");
    match import::run_import(pool, bytes, Some(&file_name), &opts).await {
        Ok(report) => {
            bot.send_message(msg.chat.id, report.summary(MAX_REPORTED_ERRORS))
                .await?;
        }
        Err(err) if err.is_client_error() => {
            bot.send_message(msg.chat.id, format!("Import failed: {err}"))
                .await?;
        }
        Err(err) => {
            bot.send_message(msg.chat.id, "Import failed: internal error.")
                .await?;
            return Err(err.into());
        }
    }
    Ok(())
}

#[instrument(skip_all)]
async fn handle_callback(bot: Bot, q: CallbackQuery, pool: Pool, cfg: Arc<Config>) -> Result<()> {
    let Some((order_id, status)) = q.data.as_deref().and_then(format::parse_callback) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let tg_user_id = q.from.id.0 as i64;
    if !db::is_admin(&pool, tg_user_id).await? {
        bot.answer_callback_query(q.id.clone())
            .text("Access denied.")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let answer = match orders::set_status(&pool, order_id, status).await {
        Ok(order) => {
            info!(order_id, tg_user_id, status = status.as_str(), "status changed via bot");
            if let Some(message) = &q.message {
                refresh_order_message(&bot, &pool, &cfg, message, order_id).await?;
            }
            format!("Order #{order_id}: {}", order.status.label())
        }
        Err(err @ (OrderError::NotFound | OrderError::InvalidTransition { .. })) => err.to_string(),
        Err(err) => {
            bot.answer_callback_query(q.id.clone())
                .text("Something went wrong.")
                .await?;
            return Err(err.into());
        }
    };
    bot.answer_callback_query(q.id.clone()).text(answer).await?;
    Ok(())
}

/// Re-render the admin notice so the text and buttons match the new status.
async fn refresh_order_message(
    bot: &Bot,
    pool: &Pool,
    cfg: &Config,
    message: &Message,
    order_id: i64,
) -> Result<()> {
    let Some(rendered) = render_order(pool, order_id, &cfg.app.currency).await? else {
        return Ok(());
    };
    let mut req = bot
        .edit_message_text(message.chat.id, message.id, rendered.text)
        .parse_mode(ParseMode::Html);
    if let Some(kb) = rendered.keyboard {
        req = req.reply_markup(kb);
    }
    if let Err(err) = req.await {
        warn!(?err, order_id, "failed to edit order message");
    }
    Ok(())
}

async fn download_file(bot: &Bot, file_id: &str) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let mut buf = Vec::with_capacity(file.meta.size as usize);
    bot.download_file(&file.path, &mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognised() {
        assert_eq!(command_of("/start"), Some("/start"));
        assert_eq!(command_of("/start@shop_bot ref42"), Some("/start"));
        assert_eq!(command_of("  /ping "), Some("/ping"));
        assert_eq!(command_of("hello /start"), None);
        assert_eq!(command_of(""), None);
    }

    #[test]
    fn import_file_names() {
        assert!(is_import_file("prices.CSV"));
        assert!(is_import_file("Прайс.xlsx"));
        assert!(!is_import_file("photo.jpg"));
        assert!(!is_import_file(""));
    }
}
