//! Product Data Extractor port.
//!
//! The core only consumes [`ProductRecord`]; how a listing page is fetched and
//! parsed lives in an adapter crate.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::draft::Installments;

/// Best-effort structured view of a product listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProductRecord {
    pub title: String,
    pub price: Option<Decimal>,
    pub original_price: Option<Decimal>,
    pub installments: Option<Installments>,
    pub image_url: Option<String>,
    pub seller_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("timed out after {0:?} fetching the listing")]
    Timeout(Duration),

    #[error("listing not found: {0}")]
    NotFound(String),

    #[error("could not parse listing: {0}")]
    ParseFailure(String),
}

#[async_trait]
pub trait ProductExtractor: Send + Sync {
    async fn extract(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<ProductRecord, ExtractionError>;
}
