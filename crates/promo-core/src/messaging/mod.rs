//! Cross-messenger abstractions (Telegram for the operator, Telegram and
//! WhatsApp for delivery).

pub mod port;
pub mod throttled;
pub mod types;
