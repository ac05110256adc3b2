//! Abstract button layouts attached to the promotion card.

use tracing::warn;

use crate::{
    broadcast::TargetSelector,
    conversation::action::{Action, Upcoming},
    domain::Platform,
    draft::DraftField,
    messaging::types::{InlineButton, InlineKeyboard},
    registry::Destination,
};

/// Telegram rejects callback data longer than this.
pub const MAX_ACTION_BYTES: usize = 64;

fn button(label: impl Into<String>, action: Action) -> InlineButton {
    InlineButton::new(label, action.to_string())
}

fn edit(field: DraftField) -> InlineButton {
    button(field.label(), Action::Edit(field))
}

/// Editing menu. `platforms` are the ones with a delivery route.
pub fn main_menu(from_price_mode: bool, platforms: &[Platform]) -> InlineKeyboard {
    let toggle_label = if from_price_mode {
        "💰 A partir de ✅"
    } else {
        "💰 A partir de"
    };

    let mut kb = InlineKeyboard::default()
        .row(vec![edit(DraftField::Title)])
        .row(vec![
            edit(DraftField::Price),
            button(toggle_label, Action::ToggleFromPrice),
        ])
        .row(vec![edit(DraftField::OriginalPrice)])
        .row(vec![
            edit(DraftField::InstallmentsText),
            edit(DraftField::PriceDetails),
        ])
        .row(vec![edit(DraftField::UnitPrice)])
        .row(vec![edit(DraftField::ComparePrice)])
        .row(vec![edit(DraftField::TopMessage)])
        .row(vec![edit(DraftField::FinalMessage)])
        .row(vec![edit(DraftField::SellerName), edit(DraftField::Coupon)])
        .row(vec![edit(DraftField::Pix)])
        .row(vec![edit(DraftField::AiNotes)])
        .row(vec![edit(DraftField::Notes)])
        .row(vec![edit(DraftField::Image)])
        .row(vec![button(
            "🌐 Ativar Promoção / Postar no site",
            Action::ComingSoon(Upcoming::Site),
        )]);

    if platforms.contains(&Platform::WhatsApp) {
        kb = kb.row(vec![button(
            "📱 Disparar no WhatsApp",
            Action::OpenTargets(Platform::WhatsApp),
        )]);
    }
    if platforms.contains(&Platform::Telegram) {
        kb = kb.row(vec![button(
            "🤖 Disparar no Telegram",
            Action::OpenTargets(Platform::Telegram),
        )]);
    }
    if platforms.len() > 1 {
        kb = kb.row(vec![button(
            "📣 Disparar em todos os grupos",
            Action::Broadcast(TargetSelector::All),
        )]);
    }

    kb.row(vec![button(
        "📸 Gerar Story p/ Instagram",
        Action::ComingSoon(Upcoming::Story),
    )])
}

/// Destination picker for one platform.
///
/// Destinations whose action id would not fit in a button are left out of
/// the single-target buttons; "Todos os Grupos" still reaches them.
pub fn targets_menu(platform: Platform, destinations: &[Destination]) -> InlineKeyboard {
    let mut kb = InlineKeyboard::default();

    if destinations.is_empty() {
        kb = kb.row(vec![button(
            "Nenhum grupo registrado",
            Action::Broadcast(TargetSelector::NoneRegistered),
        )]);
    } else {
        kb = kb.row(vec![button(
            "📱 Todos os Grupos",
            Action::Broadcast(TargetSelector::Platform(platform)),
        )]);

        let buttons = destinations
            .iter()
            .filter_map(|d| {
                let action = Action::Broadcast(TargetSelector::Single(d.key())).to_string();
                if action.len() > MAX_ACTION_BYTES {
                    warn!(destination = %d.key(), "destination id too long for a button");
                    return None;
                }
                Some(InlineButton::new(d.display_name.clone(), action))
            })
            .collect();
        kb = kb.two_per_row(buttons);
    }

    kb.row(vec![button("⬅️ Voltar", Action::MainMenu)])
}
