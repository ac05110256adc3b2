use async_trait::async_trait;

use crate::{
    broadcast::DeliveryError,
    domain::{ChatId, MessageRef, Platform},
    messaging::types::InlineKeyboard,
    registry::Destination,
    Result,
};

/// Operator-facing port: publishes the promotion card in the composing chat and
/// edits it in place.
///
/// Text is Telegram legacy Markdown.
#[async_trait]
pub trait PublishPort: Send + Sync {
    async fn publish_new(
        &self,
        chat_id: ChatId,
        text: &str,
        image_url: Option<&str>,
        menu: &InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn edit_caption(&self, msg: MessageRef, text: &str, menu: &InlineKeyboard)
        -> Result<()>;

    async fn edit_media(
        &self,
        msg: MessageRef,
        image_url: &str,
        text: &str,
        menu: &InlineKeyboard,
    ) -> Result<()>;

    async fn edit_menu(&self, msg: MessageRef, menu: &InlineKeyboard) -> Result<()>;

    async fn notify(&self, chat_id: ChatId, text: &str) -> Result<()>;

    /// Longest text a photo card can carry; longer cards are sent as text.
    fn caption_limit(&self) -> Option<usize> {
        None
    }
}

/// Delivery capability of one platform (Telegram groups, WhatsApp relay, ...).
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send_to(
        &self,
        destination: &Destination,
        text: &str,
        image_url: Option<&str>,
    ) -> std::result::Result<(), DeliveryError>;
}
