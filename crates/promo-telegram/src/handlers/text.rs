use std::sync::Arc;

use teloxide::prelude::*;

use promo_core::domain::ChatId;

use crate::handlers::reply_markdown;
use crate::router::AppState;

pub async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if text.trim().is_empty() {
        return Ok(());
    }

    let feedback = state
        .engine
        .free_text_received(ChatId(msg.chat.id.0), text)
        .await;

    if let Some(message) = feedback.message {
        reply_markdown(&bot, msg.chat.id, &message).await;
    }
    Ok(())
}
