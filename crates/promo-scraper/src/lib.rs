//! Product listing extractor.
//!
//! Fetches a shared product link (following marketplace redirects) and parses
//! the landing page into a [`ProductRecord`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use promo_core::{
    errors::Error,
    extractor::{ExtractionError, ProductExtractor, ProductRecord},
    Result,
};

mod parse;

pub use parse::parse_listing;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct HttpProductExtractor {
    http: reqwest::Client,
}

impl HttpProductExtractor {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::External(format!("http client error: {e}")))?;
        Ok(Self { http })
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> std::result::Result<String, ExtractionError> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "pt-BR,pt;q=0.9")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, timeout, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(ExtractionError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ExtractionError::ParseFailure(format!(
                "listing answered {status}"
            )));
        }

        debug!(final_url = %resp.url(), "listing fetched");
        resp.text()
            .await
            .map_err(|e| request_error(url, timeout, e))
    }
}

fn request_error(url: &str, timeout: Duration, e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::Timeout(timeout)
    } else if e.is_connect() || e.is_builder() {
        ExtractionError::NotFound(format!("{url}: {e}"))
    } else {
        ExtractionError::ParseFailure(e.to_string())
    }
}

#[async_trait]
impl ProductExtractor for HttpProductExtractor {
    async fn extract(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<ProductRecord, ExtractionError> {
        let html = self.fetch(url, timeout).await?;
        let record = parse_listing(&html).map_err(|e| {
            warn!(url, error = %e, "listing page not understood");
            e
        })?;
        debug!(
            title = %record.title,
            has_price = record.price.is_some(),
            has_image = record.image_url.is_some(),
            "listing parsed"
        );
        Ok(record)
    }
}
