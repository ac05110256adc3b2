use std::sync::OnceLock;

use regex::Regex;

pub const USAGE: &str = "Me manda assim:\n/promo <link_compartilhado_do_produto> <link_afiliado_sec> [cupom=APROVEITA] [pix=R$ 88,00]";

/// Arguments of `/promo <shared_url> [affiliate_url] [cupom=CODE] [pix=free text]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeRequest {
    /// Listing page to extract from.
    pub shared_url: String,
    /// Link printed in the card; the shared link when no second URL is given.
    pub affiliate_url: String,
    pub coupon: Option<String>,
    pub pix: Option<String>,
}

impl ComposeRequest {
    pub fn new(shared_url: impl Into<String>) -> Self {
        let shared_url = shared_url.into();
        Self {
            affiliate_url: shared_url.clone(),
            shared_url,
            coupon: None,
            pix: None,
        }
    }

    /// Parse the command text; `None` when it carries no URL.
    pub fn parse(text: &str) -> Option<Self> {
        let mut urls = url_re().find_iter(text).map(|m| m.as_str().to_string());
        let shared_url = urls.next()?;
        let affiliate_url = urls.next().unwrap_or_else(|| shared_url.clone());

        let coupon = coupon_re()
            .captures(text)
            .map(|c| c[1].to_string());
        let pix = pix_re()
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());

        Some(Self {
            shared_url,
            affiliate_url,
            coupon,
            pix,
        })
    }
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").expect("valid regex"))
}

fn coupon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:^|\s)cupom=(\S+)").expect("valid regex"))
}

// pix runs to the end of the line: "pix=R$ 88,00 no app".
fn pix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:^|\s)pix=([^\n]+)").expect("valid regex"))
}
