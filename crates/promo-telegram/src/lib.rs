//! Telegram adapter (teloxide).
//!
//! Implements the `promo-core` publish and delivery ports over the Telegram
//! Bot API. Cards use Telegram legacy Markdown.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto,
        ParseMode,
    },
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod router;

use promo_core::{
    broadcast::DeliveryError,
    domain::{ChatId, MessageId, MessageRef, Platform},
    errors::Error,
    messaging::{
        port::{DeliveryPort, PublishPort},
        types::InlineKeyboard,
    },
    registry::Destination,
    Result,
};

/// Telegram refuses photo captions longer than this (characters).
pub const CAPTION_LIMIT: usize = 1024;

#[allow(deprecated)]
pub(crate) const CARD_PARSE_MODE: ParseMode = ParseMode::Markdown;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Send a card: photo with caption when possible, text otherwise.
    ///
    /// Returns the sent message and whether it carries media.
    async fn send_card(
        &self,
        chat: teloxide::types::ChatId,
        text: &str,
        image_url: Option<&str>,
        markup: Option<InlineKeyboardMarkup>,
    ) -> std::result::Result<(Message, bool), RequestError> {
        if let Some(url) = photo_url(text, image_url) {
            let sent = self
                .with_retry(|| {
                    let req = self
                        .bot
                        .send_photo(chat, InputFile::url(url.clone()))
                        .caption(text.to_string())
                        .parse_mode(CARD_PARSE_MODE);
                    match markup.clone() {
                        Some(m) => req.reply_markup(m),
                        None => req,
                    }
                })
                .await;

            match sent {
                Ok(m) => return Ok((m, true)),
                // Telegram could not fetch or accept the image; the text still goes out.
                Err(RequestError::Api(e)) => {
                    warn!(chat_id = chat.0, error = %e, "photo rejected, sending text card");
                }
                Err(e) => return Err(e),
            }
        }

        let m = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_message(chat, text.to_string())
                    .parse_mode(CARD_PARSE_MODE);
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await?;
        Ok((m, false))
    }
}

fn fits_caption(text: &str) -> bool {
    text.chars().count() <= CAPTION_LIMIT
}

/// The image to attach, if the text fits a caption and the URL parses.
fn photo_url(text: &str, image_url: Option<&str>) -> Option<reqwest::Url> {
    let url = image_url?;
    if !fits_caption(text) {
        return None;
    }
    url.parse::<reqwest::Url>().ok()
}

/// Convert the core's abstract keyboard into Telegram inline markup.
pub fn to_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback_data.clone()))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Classify a Bot API failure for the delivery report.
pub fn delivery_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::RetryAfter(d) => DeliveryError::RateLimited {
            retry_after: Some(d),
        },
        RequestError::MigrateToChatId(id) => {
            DeliveryError::Rejected(format!("group migrated to supergroup {id:?}"))
        }
        RequestError::Api(ApiError::BotKicked | ApiError::BotKickedFromSupergroup) => {
            DeliveryError::Rejected("bot was removed from the group".to_string())
        }
        RequestError::Api(ApiError::ChatNotFound) => {
            DeliveryError::Rejected("chat not found".to_string())
        }
        RequestError::Api(other) => DeliveryError::Rejected(other.to_string()),
        RequestError::Network(e) => DeliveryError::Unreachable(e.to_string()),
        other => DeliveryError::Unreachable(other.to_string()),
    }
}

#[async_trait]
impl PublishPort for TelegramMessenger {
    async fn publish_new(
        &self,
        chat_id: ChatId,
        text: &str,
        image_url: Option<&str>,
        menu: &InlineKeyboard,
    ) -> Result<MessageRef> {
        let (msg, has_media) = self
            .send_card(Self::tg_chat(chat_id), text, image_url, Some(to_markup(menu)))
            .await
            .map_err(Self::map_err)?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
            has_media,
        })
    }

    async fn edit_caption(
        &self,
        msg: MessageRef,
        text: &str,
        menu: &InlineKeyboard,
    ) -> Result<()> {
        let chat = Self::tg_chat(msg.chat_id);
        let id = Self::tg_msg_id(msg.message_id);
        let markup = to_markup(menu);

        let res = if msg.has_media {
            self.with_retry(|| {
                self.bot
                    .edit_message_caption(chat, id)
                    .caption(text.to_string())
                    .parse_mode(CARD_PARSE_MODE)
                    .reply_markup(markup.clone())
            })
            .await
        } else {
            self.with_retry(|| {
                self.bot
                    .edit_message_text(chat, id, text.to_string())
                    .parse_mode(CARD_PARSE_MODE)
                    .reply_markup(markup.clone())
            })
            .await
        };

        match res {
            Ok(_) => Ok(()),
            // Re-rendering an unchanged card is not a failure.
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn edit_media(
        &self,
        msg: MessageRef,
        image_url: &str,
        text: &str,
        menu: &InlineKeyboard,
    ) -> Result<()> {
        let url = image_url
            .parse::<reqwest::Url>()
            .map_err(|e| Error::External(format!("invalid image url: {e}")))?;
        let chat = Self::tg_chat(msg.chat_id);
        let id = Self::tg_msg_id(msg.message_id);
        let markup = to_markup(menu);
        if !fits_caption(text) {
            return Err(Error::External(format!(
                "card has {} characters, captions allow {CAPTION_LIMIT}",
                text.chars().count()
            )));
        }
        let caption = text.to_string();

        self.with_retry(|| {
            let media = InputMedia::Photo(
                InputMediaPhoto::new(InputFile::url(url.clone()))
                    .caption(caption.clone())
                    .parse_mode(CARD_PARSE_MODE),
            );
            self.bot
                .edit_message_media(chat, id, media)
                .reply_markup(markup.clone())
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn edit_menu(&self, msg: MessageRef, menu: &InlineKeyboard) -> Result<()> {
        let markup = to_markup(menu);
        self.with_retry(|| {
            self.bot
                .edit_message_reply_markup(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                )
                .reply_markup(markup.clone())
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn notify(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat_id), text.to_string())
                .parse_mode(CARD_PARSE_MODE)
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    fn caption_limit(&self) -> Option<usize> {
        Some(CAPTION_LIMIT)
    }
}

#[async_trait]
impl DeliveryPort for TelegramMessenger {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn send_to(
        &self,
        destination: &Destination,
        text: &str,
        image_url: Option<&str>,
    ) -> std::result::Result<(), DeliveryError> {
        let id = destination.id.trim().parse::<i64>().map_err(|_| {
            DeliveryError::Rejected(format!("invalid telegram chat id: {}", destination.id))
        })?;

        self.send_card(teloxide::types::ChatId(id), text, image_url, None)
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}
