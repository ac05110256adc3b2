//! Listing page parsing.
//!
//! Best effort over the markup of Mercado Livre product pages and generic
//! OpenGraph tags. Regex based; a page that changes shape yields fewer fields,
//! never an error, as long as a title can be found.

use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use promo_core::{
    draft::{parse_decimal, Installments},
    extractor::{ExtractionError, ProductRecord},
};

const JUNK_SELLER_WORDS: [&str; 13] = [
    "receba grátis",
    "frete grátis",
    "frete",
    "entrega",
    "hoje",
    "amanhã",
    "novo |",
    "novos |",
    "vendidos",
    "vendas",
    "cupons",
    "cupom",
    "compartilhar",
];

const SELLER_CLASSES: [&str; 6] = [
    "ui-pdp-seller__link-trigger",
    "ui-pdp-seller__link",
    "ui-pdp-media__title",
    "store-info__name",
    "andes-card__header-link",
    "ui-pdp-header__subtitle",
];

/// Parse a listing page into a [`ProductRecord`].
pub fn parse_listing(html: &str) -> Result<ProductRecord, ExtractionError> {
    let title = element_text_by_class(html, "h1", "ui-pdp-title")
        .or_else(|| first_element_text(html, "h1"))
        .or_else(|| meta_content(html, "property", "og:title"))
        .or_else(|| first_element_text(html, "title"))
        .ok_or_else(|| ExtractionError::ParseFailure("no product title found".to_string()))?;

    let price = meta_content(html, "itemprop", "price")
        .or_else(|| meta_content(html, "property", "product:price:amount"))
        .and_then(|raw| parse_decimal(&raw));

    Ok(ProductRecord {
        title,
        price,
        original_price: previous_price(html),
        installments: installments(html),
        image_url: image_url(html),
        seller_name: seller_name(html),
    })
}

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn meta_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?is)<meta\b[^>]*>")
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r#"(?s)([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?s)<[^>]*>")
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\s+")
}

fn installments_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)(\d+)\s*x\s*de\s*R?\$?\s*([\d.,]+)")
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    attr_re()
        .captures_iter(tag)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map(|m| m.as_str()).unwrap_or("");
            (c[1].to_ascii_lowercase(), decode_entities(value))
        })
        .collect()
}

/// `content` of the first `<meta>` whose `key` attribute equals `value`.
fn meta_content(html: &str, key: &str, value: &str) -> Option<String> {
    meta_tag_re().find_iter(html).find_map(|m| {
        let attrs = attributes(m.as_str());
        let matches = attrs
            .iter()
            .any(|(k, v)| k == key && v.eq_ignore_ascii_case(value));
        if !matches {
            return None;
        }
        attrs
            .into_iter()
            .find(|(k, _)| k == "content")
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn first_element_text(html: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>", tag = regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    let found = re
        .captures_iter(html)
        .map(|c| clean_text(&c[1]))
        .find(|t| !t.is_empty());
    found
}

fn element_text_by_class(html: &str, tag: &str, class: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is)<{tag}\b[^>]*class\s*=\s*"[^"]*\b{class}\b[^"]*"[^>]*>(.*?)</{tag}>"#,
        tag = regex::escape(tag),
        class = regex::escape(class)
    );
    let re = Regex::new(&pattern).ok()?;
    let found = re
        .captures_iter(html)
        .map(|c| clean_text(&c[1]))
        .find(|t| !t.is_empty());
    found
}

/// Text of any element carrying `class`, whatever its tag.
fn any_element_text_by_class(html: &str, class: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is)<([a-z0-9]+)\b[^>]*class\s*=\s*"[^"]*\b{class}\b[^"]*"[^>]*>"#,
        class = regex::escape(class)
    );
    let re = Regex::new(&pattern).ok()?;
    for caps in re.captures_iter(html) {
        let whole = caps.get(0)?;
        let tag = caps[1].to_ascii_lowercase();
        let rest = &html[whole.end()..];
        let close = format!("</{tag}>");
        let end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
        let text = clean_text(&rest[..end]);
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// Strip tags, decode entities, collapse whitespace.
fn clean_text(fragment: &str) -> String {
    let no_tags = tag_re().replace_all(fragment, " ");
    let decoded = decode_entities(&no_tags);
    whitespace_re().replace_all(decoded.trim(), " ").to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn previous_price(html: &str) -> Option<Decimal> {
    let start = html.find("andes-money-amount--previous")?;
    let block = window(html, start, 1200);

    let fraction = any_element_text_by_class(block, "andes-money-amount__fraction")?;
    let cents = any_element_text_by_class(block, "andes-money-amount__cents");

    let integer: String = fraction.chars().filter(|c| c.is_ascii_digit()).collect();
    if integer.is_empty() {
        return None;
    }
    let raw = match cents {
        Some(c) if c.chars().all(|ch| ch.is_ascii_digit()) => format!("{integer}.{c}"),
        _ => integer,
    };
    parse_decimal(&raw)
}

fn installments(html: &str) -> Option<Installments> {
    let start = html
        .find("ui-pdp-price__subtitles")
        .or_else(|| html.find(r#"data-testid="installments""#))?;
    let text = clean_text(window(html, start, 1500));

    let caps = installments_re().captures(&text)?;
    let count = caps[1].parse::<u32>().ok()?;
    // Sentence punctuation after the amount is not a decimal separator.
    let amount = parse_decimal(caps[2].trim_end_matches(['.', ',']))?;
    Installments::new(count, amount)
}

fn image_url(html: &str) -> Option<String> {
    meta_content(html, "property", "og:image")
        .or_else(|| img_src_with_class(html, "ui-pdp-image"))
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
}

fn img_src_with_class(html: &str, class: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let img = re(&RE, r"(?is)<img\b[^>]*>");
    img.find_iter(html).find_map(|m| {
        let attrs = attributes(m.as_str());
        let has_class = attrs
            .iter()
            .any(|(k, v)| k == "class" && v.split_whitespace().any(|c| c == class));
        if !has_class {
            return None;
        }
        attrs
            .iter()
            .find(|(k, _)| k == "data-zoom")
            .or_else(|| attrs.iter().find(|(k, _)| k == "src"))
            .map(|(_, v)| v.clone())
    })
}

fn seller_name(html: &str) -> Option<String> {
    for class in SELLER_CLASSES {
        if let Some(text) = any_element_text_by_class(html, class) {
            if let Some(name) = usable_seller(&text) {
                return Some(name);
            }
        }
    }

    let title = first_element_text(html, "title")?;
    static RE: OnceLock<Regex> = OnceLock::new();
    let caps = re(&RE, r"(?i)Loja\s+Oficial\s+(.+)").captures(&title)?;
    usable_seller(&caps[1])
}

fn usable_seller(raw: &str) -> Option<String> {
    if is_junk(raw) {
        return None;
    }
    let cleaned = strip_store_boilerplate(raw);
    if cleaned.is_empty() || is_junk(&cleaned) || cleaned.split_whitespace().count() > 5 {
        return None;
    }
    Some(cleaned)
}

fn strip_store_boilerplate(raw: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = re(
        &RE,
        r"(?i)acesse a loja oficial de|loja oficial de|loja oficial|visite a página e encontre todos os produtos de|ver mais anúncios|vendido por",
    );
    whitespace_re()
        .replace_all(re.replace_all(raw, " ").trim(), " ")
        .to_string()
}

fn is_junk(text: &str) -> bool {
    let lower = text.to_lowercase();
    JUNK_SELLER_WORDS.iter().any(|w| lower.contains(w))
}

/// `len` bytes of `s` from `start`, clipped to char boundaries.
fn window(s: &str, start: usize, len: usize) -> &str {
    let mut end = (start + len).min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = include_str!("../fixtures/ml_listing.html");
    const OG_ONLY: &str = include_str!("../fixtures/og_only.html");

    #[test]
    fn parses_mercado_livre_listing() {
        let rec = parse_listing(LISTING).unwrap();
        assert_eq!(rec.title, "Tênis Corrida Acme Run 2 Masculino");
        assert_eq!(rec.price, Some(Decimal::new(12990, 2)));
        assert_eq!(rec.original_price, Some(Decimal::new(15990, 2)));
        assert_eq!(rec.installments, Installments::new(3, Decimal::new(4330, 2)));
        assert_eq!(
            rec.image_url.as_deref(),
            Some("https://http2.mlstatic.com/D_NQ_NP_2X_acme-run.webp")
        );
        assert_eq!(rec.seller_name.as_deref(), Some("Acme Esportes"));
    }

    #[test]
    fn falls_back_to_opengraph() {
        let rec = parse_listing(OG_ONLY).unwrap();
        assert_eq!(rec.title, "Cafeteira Expresso & Cia");
        assert_eq!(rec.price, Some(Decimal::new(49900, 2)));
        assert!(rec.original_price.is_none());
        assert!(rec.installments.is_none());
        assert_eq!(rec.image_url.as_deref(), Some("https://img.example.com/cafe.jpg"));
        assert_eq!(rec.seller_name.as_deref(), Some("Casa do Café"));
    }

    #[test]
    fn installment_amount_ignores_trailing_punctuation() {
        let html = r#"<div class="ui-pdp-price__subtitles"><p>ou 12x de R$ 19,90.</p></div>"#;
        assert_eq!(installments(html), Installments::new(12, Decimal::new(1990, 2)));

        let html = r#"<div class="ui-pdp-price__subtitles"><p>em 10x de R$ 1.299,00, sem juros</p></div>"#;
        assert_eq!(installments(html), Installments::new(10, Decimal::new(129900, 2)));
    }

    #[test]
    fn page_without_title_is_a_parse_failure() {
        let err = parse_listing("<html><body><p>nada</p></body></html>").unwrap_err();
        assert!(matches!(err, ExtractionError::ParseFailure(_)));
    }

    #[test]
    fn seller_filters_noise() {
        assert_eq!(usable_seller("Frete grátis hoje"), None);
        assert_eq!(
            usable_seller("Loja oficial de  Acme Esportes"),
            Some("Acme Esportes".to_string())
        );
        assert_eq!(usable_seller("um nome de loja longo demais aqui"), None);
    }

    #[test]
    fn text_cleanup() {
        assert_eq!(clean_text("<b>A</b>\n  &amp;  <i>B</i>"), "A & B");
        assert_eq!(window("ção", 0, 2), "ç");
    }
}
