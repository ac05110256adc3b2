//! Draft document model: one promotion being composed.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;

use crate::extractor::ProductRecord;

/// Seller label used when the listing does not expose one.
pub const DEFAULT_SELLER_NAME: &str = "Vendedor";

/// Structured installment terms ("3x of R$ 43,30").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Installments {
    pub count: u32,
    pub amount: Decimal,
}

impl Installments {
    /// Returns `None` unless both `count` and `amount` are positive.
    pub fn new(count: u32, amount: Decimal) -> Option<Self> {
        if count == 0 || amount <= Decimal::ZERO {
            return None;
        }
        Some(Self { count, amount })
    }
}

/// Fields an operator can edit through the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DraftField {
    Title,
    Price,
    OriginalPrice,
    InstallmentsText,
    PriceDetails,
    UnitPrice,
    ComparePrice,
    TopMessage,
    FinalMessage,
    SellerName,
    Coupon,
    Pix,
    AiNotes,
    Notes,
    Image,
}

impl DraftField {
    pub const ALL: [DraftField; 15] = [
        DraftField::Title,
        DraftField::Price,
        DraftField::OriginalPrice,
        DraftField::InstallmentsText,
        DraftField::PriceDetails,
        DraftField::UnitPrice,
        DraftField::ComparePrice,
        DraftField::TopMessage,
        DraftField::FinalMessage,
        DraftField::SellerName,
        DraftField::Coupon,
        DraftField::Pix,
        DraftField::AiNotes,
        DraftField::Notes,
        DraftField::Image,
    ];

    /// Stable token used inside action ids (`edit:<token>`).
    pub fn as_str(self) -> &'static str {
        match self {
            DraftField::Title => "title",
            DraftField::Price => "price",
            DraftField::OriginalPrice => "original_price",
            DraftField::InstallmentsText => "installments",
            DraftField::PriceDetails => "price_details",
            DraftField::UnitPrice => "unit_price",
            DraftField::ComparePrice => "compare_price",
            DraftField::TopMessage => "top_message",
            DraftField::FinalMessage => "final_message",
            DraftField::SellerName => "seller",
            DraftField::Coupon => "coupon",
            DraftField::Pix => "pix",
            DraftField::AiNotes => "ai_notes",
            DraftField::Notes => "notes",
            DraftField::Image => "image",
        }
    }

    /// Button label in the editing menu.
    pub fn label(self) -> &'static str {
        match self {
            DraftField::Title => "📝 Nome",
            DraftField::Price => "💰 Preço",
            DraftField::OriginalPrice => "🏷 Preço anterior",
            DraftField::InstallmentsText => "🧾 Parcelas",
            DraftField::PriceDetails => "💲 Detalhes do preço",
            DraftField::UnitPrice => "⚖️ Preço por unidade",
            DraftField::ComparePrice => "📊 Preço Comparação",
            DraftField::TopMessage => "📢 Mensagem do topo",
            DraftField::FinalMessage => "✏️ Mensagem do final",
            DraftField::SellerName => "🏬 Loja",
            DraftField::Coupon => "🎟 Cupom",
            DraftField::Pix => "💸 Pix",
            DraftField::AiNotes => "✨ Observações com IA",
            DraftField::Notes => "🗒 Observações",
            DraftField::Image => "🖼 Alterar imagem",
        }
    }

    /// Question sent to the operator after the field button is pressed (Markdown).
    pub fn prompt(self) -> &'static str {
        match self {
            DraftField::Title => "Digite o novo *nome do produto*:",
            DraftField::Price => "Digite o novo *preço* (apenas número, ex: 134.9):",
            DraftField::OriginalPrice => {
                "Digite o *preço anterior* (apenas número, ex: 159.9):"
            }
            DraftField::InstallmentsText => {
                "Digite o texto das *parcelas* (ex: Em até 10x de R$ 19,90):"
            }
            DraftField::PriceDetails => {
                "Digite os *detalhes do preço* (ex: à vista no boleto, etc):"
            }
            DraftField::UnitPrice => "Digite o *preço por unidade* (ex: R$ 1,20 por cápsula):",
            DraftField::ComparePrice => {
                "Digite o *preço comparação* (ex: antes custava R$ X na concorrência):"
            }
            DraftField::TopMessage => {
                "Digite a *mensagem do topo* (vai aparecer antes do título):"
            }
            DraftField::FinalMessage => {
                "Digite a *mensagem final* (aparece antes de 'Vendido por'):"
            }
            DraftField::SellerName => "Digite o *nome da loja/vendedor*:",
            DraftField::Coupon => "Digite o *cupom* (ex: MEUCUPOM10):",
            DraftField::Pix => "Digite a condição do *Pix* (ex: R$ 88,00):",
            DraftField::AiNotes => {
                "Digite as *observações com IA* (um texto extra que fica no card):"
            }
            DraftField::Notes => "Digite as *observações* extras:",
            DraftField::Image => "Envie a *URL da nova imagem* (link direto da imagem):",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DraftField::Price | DraftField::OriginalPrice)
    }
}

impl fmt::Display for DraftField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DraftField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown field: {s}"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("invalid number for {field}: {input:?}")]
    InvalidNumber { field: DraftField, input: String },

    #[error("invalid image url: {0:?}")]
    InvalidUrl(String),
}

/// One promotion in progress.
///
/// `title` and `affiliate_url` are always present; every `Option` renders as an
/// omitted line when `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Draft {
    pub title: String,
    pub price: Option<Decimal>,
    pub original_price: Option<Decimal>,
    pub from_price_mode: bool,
    pub installments: Option<Installments>,
    pub installments_text: Option<String>,
    pub price_details: Option<String>,
    pub unit_price_text: Option<String>,
    pub compare_price_text: Option<String>,
    pub top_message: Option<String>,
    pub final_message: Option<String>,
    pub coupon_code: Option<String>,
    pub pix_info: Option<String>,
    pub ai_notes: Option<String>,
    pub notes: Option<String>,
    pub seller_name: String,
    pub image_url: Option<String>,
    affiliate_url: String,
}

impl Draft {
    pub fn new(title: impl Into<String>, affiliate_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            price: None,
            original_price: None,
            from_price_mode: false,
            installments: None,
            installments_text: None,
            price_details: None,
            unit_price_text: None,
            compare_price_text: None,
            top_message: None,
            final_message: None,
            coupon_code: None,
            pix_info: None,
            ai_notes: None,
            notes: None,
            seller_name: DEFAULT_SELLER_NAME.to_string(),
            image_url: None,
            affiliate_url: affiliate_url.into(),
        }
    }

    /// Build the initial draft from an extracted listing.
    pub fn from_product(
        record: ProductRecord,
        affiliate_url: impl Into<String>,
        default_seller: &str,
    ) -> Self {
        let title = non_empty(record.title).unwrap_or_else(|| "Produto sem título".to_string());
        let seller_name = record
            .seller_name
            .and_then(non_empty)
            .or_else(|| non_empty(default_seller.to_string()))
            .unwrap_or_else(|| DEFAULT_SELLER_NAME.to_string());

        Self {
            price: record.price,
            original_price: record.original_price,
            installments: record.installments,
            image_url: record.image_url.and_then(non_empty),
            seller_name,
            ..Self::new(title, affiliate_url)
        }
    }

    pub fn affiliate_url(&self) -> &str {
        &self.affiliate_url
    }

    pub fn toggle_from_price_mode(&mut self) {
        self.from_price_mode = !self.from_price_mode;
    }

    /// Apply operator input to one field.
    ///
    /// Input is trimmed. An empty value clears optional fields; for `title` and
    /// `seller_name` it is ignored so the required fields never go blank.
    /// On error the draft is left untouched.
    pub fn set_field(&mut self, field: DraftField, raw: &str) -> Result<(), FieldError> {
        let value = raw.trim();

        match field {
            DraftField::Title => {
                if !value.is_empty() {
                    self.title = value.to_string();
                }
            }
            DraftField::SellerName => {
                if !value.is_empty() {
                    self.seller_name = value.to_string();
                }
            }
            DraftField::Price | DraftField::OriginalPrice => {
                let parsed = if value.is_empty() {
                    None
                } else {
                    Some(parse_decimal(value).ok_or_else(|| FieldError::InvalidNumber {
                        field,
                        input: value.to_string(),
                    })?)
                };
                if field == DraftField::Price {
                    self.price = parsed;
                } else {
                    self.original_price = parsed;
                }
            }
            DraftField::Image => {
                if !value.is_empty() && !looks_like_url(value) {
                    return Err(FieldError::InvalidUrl(value.to_string()));
                }
                self.image_url = optional(value);
            }
            DraftField::InstallmentsText => self.installments_text = optional(value),
            DraftField::PriceDetails => self.price_details = optional(value),
            DraftField::UnitPrice => self.unit_price_text = optional(value),
            DraftField::ComparePrice => self.compare_price_text = optional(value),
            DraftField::TopMessage => self.top_message = optional(value),
            DraftField::FinalMessage => self.final_message = optional(value),
            DraftField::Coupon => self.coupon_code = optional(value),
            DraftField::Pix => self.pix_info = optional(value),
            DraftField::AiNotes => self.ai_notes = optional(value),
            DraftField::Notes => self.notes = optional(value),
        }

        Ok(())
    }
}

/// Parse a decimal typed by a person: `134.9`, `134,90`, `R$ 1.234,56`, `1,234.56`.
///
/// When both separators appear the last one is the decimal point; a lone
/// separator repeated several times is grouping. Negative values are rejected.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    let s = s.strip_prefix("R$").unwrap_or(s).trim();
    if s.is_empty() {
        return None;
    }

    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            let (group, decimal) = if d > c { (',', '.') } else { ('.', ',') };
            s.replace(group, "").replace(decimal, ".")
        }
        (None, Some(_)) if s.matches(',').count() == 1 => s.replace(',', "."),
        (Some(_), None) if s.matches('.').count() == 1 => s.to_string(),
        (None, Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace('.', ""),
        (None, None) => s.to_string(),
    };

    let value = Decimal::from_str(&normalized).ok()?;
    if value.is_sign_negative() {
        return None;
    }
    Some(value)
}

fn looks_like_url(s: &str) -> bool {
    (s.starts_with("http://") || s.starts_with("https://")) && !s.contains(char::is_whitespace)
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
