//! WhatsApp relay adapter.
//!
//! WhatsApp delivery goes through a small HTTP relay that owns the WhatsApp
//! Web session and looks groups up by title:
//! `POST {base}/whats/send` with `{groupTitle, message, imageUrl?}`, answered
//! by `{ok: true}` or `{ok: false, error}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use promo_core::{
    broadcast::DeliveryError,
    domain::Platform,
    errors::Error,
    messaging::port::DeliveryPort,
    registry::Destination,
    utils::truncate_text,
    Result,
};

/// HTTP connect timeout for the relay.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Request timeout; image downloads on the relay side can be slow.
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    group_title: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct RelayResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WhatsAppRelay {
    http: reqwest::Client,
    base_url: String,
}

impl WhatsAppRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::External(format!("whatsapp relay client error: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_send(
        &self,
        group_title: &str,
        message: &str,
        image_url: Option<&str>,
    ) -> std::result::Result<(), DeliveryError> {
        let url = format!("{}/whats/send", self.base_url);
        let body = SendRequest {
            group_title,
            message,
            image_url,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Unreachable(format!("whatsapp relay: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DeliveryError::RateLimited { retry_after: None });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| DeliveryError::Unreachable(format!("whatsapp relay: {e}")))?;

        match serde_json::from_str::<RelayResponse>(&text) {
            Ok(RelayResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Ok(RelayResponse { error, .. }) => Err(DeliveryError::Rejected(
                error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| format!("relay answered {status}")),
            )),
            Err(_) if status.is_server_error() => Err(DeliveryError::Unreachable(format!(
                "relay answered {status}: {}",
                truncate_text(text.trim(), 200)
            ))),
            Err(_) => Err(DeliveryError::Rejected(format!(
                "unexpected relay response ({status}): {}",
                truncate_text(text.trim(), 200)
            ))),
        }
    }
}

/// Drop the backslash escapes added for Telegram Markdown; WhatsApp shows
/// them literally. `*bold*` is the same on both.
pub fn to_whatsapp_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut chars = markdown.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '_' | '*' | '`' | '[') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

#[async_trait]
impl DeliveryPort for WhatsAppRelay {
    fn platform(&self) -> Platform {
        Platform::WhatsApp
    }

    async fn send_to(
        &self,
        destination: &Destination,
        text: &str,
        image_url: Option<&str>,
    ) -> std::result::Result<(), DeliveryError> {
        let message = to_whatsapp_text(text);
        self.post_send(&destination.id, &message, image_url).await?;
        debug!(group = %destination.id, "message sent via whatsapp relay");
        Ok(())
    }
}
