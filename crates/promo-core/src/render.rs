//! Promotional card rendering (Draft → Telegram legacy Markdown).

use rust_decimal::{Decimal, RoundingStrategy};

use crate::draft::Draft;

/// A rendered card ready to publish or broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub image_url: Option<String>,
}

impl RenderedMessage {
    pub fn from_draft(draft: &Draft) -> Self {
        Self {
            text: render(draft),
            image_url: draft.image_url.clone(),
        }
    }
}

/// Render a draft into the promotional message.
///
/// Total and deterministic: absent fields skip their line, nothing renders as
/// "null" or `0`. Operator free text is escaped; bold-wrapped values drop `*`
/// instead, since legacy Markdown has no escapes inside an entity.
pub fn render(d: &Draft) -> String {
    let mut card = Card::default();

    if let Some(top) = &d.top_message {
        card.line(&escape_markdown(top));
        card.blank();
    }

    card.line(&format!("*{}*", bold_safe(&d.title)));
    card.blank();

    if let Some(original) = d.original_price {
        card.line(&format!("De {}", format_brl(original)));
    }

    if let Some(price) = d.price {
        let label = if d.from_price_mode { "A partir de" } else { "Por" };
        card.line(&format!("{label} {}", format_brl(price)));
    }

    if let Some(details) = &d.price_details {
        card.line(&escape_markdown(details));
    }

    if let Some(text) = &d.installments_text {
        card.line(&escape_markdown(text));
    } else if let Some(inst) = &d.installments {
        card.line(&format!(
            "Em até {}x de {}",
            inst.count,
            format_brl(inst.amount)
        ));
    }

    if let Some(unit) = &d.unit_price_text {
        card.blank();
        card.line(&format!("⚖️ {}", escape_markdown(unit)));
    }
    if let Some(compare) = &d.compare_price_text {
        card.line(&format!("📊 {}", escape_markdown(compare)));
    }

    if let Some(pix) = &d.pix_info {
        card.blank();
        card.line(&format!("💸 Pix: {}", escape_markdown(pix)));
    }

    if let Some(coupon) = &d.coupon_code {
        card.blank();
        card.line(&format!("📄 Utilize o Cupom: *{}*", bold_safe(coupon)));
    }

    if let Some(ai) = &d.ai_notes {
        card.blank();
        card.line(&format!("✨ {}", escape_markdown(ai)));
    }
    if let Some(notes) = &d.notes {
        card.blank();
        card.line(&format!("🗒 {}", escape_markdown(notes)));
    }

    if let Some(final_msg) = &d.final_message {
        card.blank();
        card.line(&escape_markdown(final_msg));
    }

    card.blank();
    card.line("🔗 Link do Produto:");
    card.line(&escape_markdown(d.affiliate_url()));
    card.blank();
    card.out
        .push_str(&format!("Vendido por: *{}*", bold_safe(&d.seller_name)));

    card.out
}

/// Line builder; section separators never stack.
#[derive(Default)]
struct Card {
    out: String,
    separated: bool,
}

impl Card {
    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
        self.separated = false;
    }

    fn blank(&mut self) {
        if !self.separated && !self.out.is_empty() {
            self.out.push('\n');
            self.separated = true;
        }
    }
}

/// Format a value as Brazilian Real: `R$ 1.234,50`.
pub fn format_brl(value: Decimal) -> String {
    let mut v = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    v.rescale(2);

    let raw = v.abs().to_string();
    let (int_part, frac_part) = raw.split_once('.').unwrap_or((raw.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if v.is_sign_negative() && !v.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}R$ {grouped},{frac_part}")
}

/// Escape Telegram legacy Markdown control characters outside entities.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn bold_safe(text: &str) -> String {
    text.replace('*', "")
}
