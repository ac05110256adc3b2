//! Core domain + application logic for PromoRadar.
//!
//! This crate is framework-agnostic. Telegram, the WhatsApp relay and the
//! product page scraper live behind ports (traits) implemented in adapter crates.

pub mod broadcast;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod draft;
pub mod errors;
pub mod extractor;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod render;
pub mod utils;

pub use errors::{Error, Result};
