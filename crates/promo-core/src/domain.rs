use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Telegram chat id (numeric). Also the conversation key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a published message.
///
/// `has_media` tells whether the message is a photo with caption (editable via
/// caption/media edits) or a plain text message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub has_media: bool,
}

/// Messaging platform a destination lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    #[serde(alias = "whats")]
    WhatsApp,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Telegram, Platform::WhatsApp];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::WhatsApp => "whatsapp",
        }
    }

    /// Human label used in menus and reports.
    pub fn label(self) -> &'static str {
        match self {
            Platform::Telegram => "Telegram",
            Platform::WhatsApp => "WhatsApp",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telegram" | "tg" => Ok(Platform::Telegram),
            "whatsapp" | "whats" => Ok(Platform::WhatsApp),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Unique key of a destination: `(platform, id)`.
///
/// Text form is `<platform>:<id>`, e.g. `telegram:-1001234`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationKey {
    pub platform: Platform,
    pub id: String,
}

impl DestinationKey {
    pub fn new(platform: Platform, id: impl Into<String>) -> Self {
        Self {
            platform,
            id: id.into(),
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.id)
    }
}

impl FromStr for DestinationKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((platform, id)) = s.split_once(':') else {
            return Err(format!("invalid destination key: {s}"));
        };
        if id.is_empty() {
            return Err(format!("invalid destination key: {s}"));
        }
        Ok(Self {
            platform: platform.parse()?,
            id: id.to_string(),
        })
    }
}
