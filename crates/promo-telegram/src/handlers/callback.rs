use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use promo_core::domain::ChatId;

use crate::handlers::reply_markdown;
use crate::router::AppState;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();

    // Always answer callback query eventually.
    let Some(tg_chat) = q.message.as_ref().map(|m| m.chat.id) else {
        let _ = bot.answer_callback_query(cb_id).await;
        return Ok(());
    };
    if data.is_empty() {
        let _ = bot.answer_callback_query(cb_id).await;
        return Ok(());
    }

    debug!(chat_id = tg_chat.0, data = %data, "callback");

    let feedback = {
        let _guard = state.chat_locks.lock_chat(tg_chat.0).await;
        state.engine.button_pressed(ChatId(tg_chat.0), &data).await
    };

    let mut answer = bot.answer_callback_query(cb_id);
    if let Some(toast) = feedback.toast {
        answer = answer.text(toast).show_alert(feedback.alert);
    }
    let _ = answer.await;

    if let Some(message) = feedback.message {
        reply_markdown(&bot, tg_chat, &message).await;
    }

    Ok(())
}
