use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use promo_core::domain::{ChatId, Platform};

use crate::handlers::reply_markdown;
use crate::router::AppState;

const WELCOME: &str = "Bem-vindo ao PromoRadar.ia 🚀\n\n\
Use assim:\n\
/promo <link_compartilhado_do_produto> <link_afiliado_sec> [cupom=...] [pix=...]\n\n\
Para registrar grupos de disparo: adicione o bot no grupo e mande /registrargrupo.\n\
Para ver os grupos registrados: /listagrupos";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Name stored for a group: its title, else its @username, else a short id.
fn group_display_name(title: Option<&str>, username: Option<&str>, chat_id: i64) -> String {
    if let Some(t) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return t.to_string();
    }
    if let Some(u) = username.map(str::trim).filter(|u| !u.is_empty()) {
        return u.to_string();
    }
    let id = chat_id.to_string();
    let tail: String = id
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("Grupo {tail}")
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let tg_chat = msg.chat.id;
    let chat_id = ChatId(tg_chat.0);
    let (cmd, _arg) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            bot.send_message(tg_chat, WELCOME).await?;
        }

        "promo" => {
            let feedback = {
                let _guard = state.chat_locks.lock_chat(tg_chat.0).await;
                state.engine.new_composition(chat_id, text).await
            };
            if let Some(message) = feedback.message {
                reply_markdown(&bot, tg_chat, &message).await;
            }
        }

        "registrargrupo" => {
            if !(msg.chat.is_group() || msg.chat.is_supergroup()) {
                bot.send_message(
                    tg_chat,
                    "Mande /registrargrupo dentro do grupo que vai receber as promoções.",
                )
                .await?;
                return Ok(());
            }

            let name = group_display_name(msg.chat.title(), msg.chat.username(), tg_chat.0);
            let reply = match state
                .engine
                .register_destination(Platform::Telegram, tg_chat.0.to_string(), name.clone())
                .await
            {
                Ok(true) => {
                    info!(chat_id = tg_chat.0, group = %name, "group registered");
                    "Grupo registrado para disparos ✅"
                }
                Ok(false) => "Este grupo já está registrado para disparos ✅",
                Err(e) => {
                    warn!(chat_id = tg_chat.0, error = %e, "group registered but not saved");
                    "Grupo registrado, mas não consegui salvar a lista de grupos 😥"
                }
            };
            bot.send_message(tg_chat, reply).await?;
        }

        "listagrupos" => {
            let listing = state.engine.destinations_listing().await;
            reply_markdown(&bot, tg_chat, &listing).await;
        }

        _ => {}
    }

    Ok(())
}
