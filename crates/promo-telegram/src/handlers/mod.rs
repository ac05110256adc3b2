//! Telegram update handlers.
//!
//! Each handler is a thin adapter: it serializes the chat, hands the event to
//! the conversation engine and relays the returned feedback.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::warn;

use crate::{router::AppState, CARD_PARSE_MODE};

mod callback;
mod commands;
mod text;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    // In groups, only answer when a field is actually awaited.
    let chat_id = promo_core::domain::ChatId(msg.chat.id.0);
    if !msg.chat.is_private() && !state.engine.awaits_input(chat_id).await {
        return Ok(());
    }

    let _guard = state.chat_locks.lock_chat(msg.chat.id.0).await;
    text::handle_text(bot, msg, state).await
}

/// Best-effort Markdown reply; failures are logged, not propagated.
pub(crate) async fn reply_markdown(bot: &Bot, chat_id: teloxide::types::ChatId, text: &str) {
    if let Err(e) = bot
        .send_message(chat_id, text.to_string())
        .parse_mode(CARD_PARSE_MODE)
        .await
    {
        warn!(chat_id = chat_id.0, error = %e, "reply failed");
    }
}
