//! Conversation state machine.
//!
//! One [`ConversationSession`] per chat. Adapters feed inbound events through
//! [`ConversationEngine::new_composition`], [`ConversationEngine::button_pressed`]
//! and [`ConversationEngine::free_text_received`] and relay the returned
//! [`Feedback`]; card publishing and edits go through the [`PublishPort`].

pub mod action;
pub mod compose;
pub mod menu;
pub mod state;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{BroadcastDispatcher, DeliveryReport, TargetSelector},
    domain::{ChatId, MessageRef, Platform},
    draft::{Draft, DraftField, FieldError, DEFAULT_SELLER_NAME},
    errors::Error,
    extractor::{ExtractionError, ProductExtractor},
    messaging::{port::PublishPort, types::InlineKeyboard},
    registry::{Destination, DestinationRegistry},
    render::{escape_markdown, render, RenderedMessage},
    Result,
};

use self::{
    action::Action,
    compose::{ComposeRequest, USAGE},
    menu::{main_menu, targets_menu},
    state::{ConversationSession, EditState, SessionStore},
};

const NEED_SESSION: &str = "Gera uma promoção primeiro com /promo 😉";
const NO_DESTINATIONS: &str =
    "Nenhum grupo registrado. Adicione o bot em um grupo e mande /registrargrupo.";
const HINT: &str = "Pra gerar uma oferta, use:\n/promo <link_compartilhado_do_produto> <link_afiliado_sec> [cupom=...] [pix=...]";

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub extract_timeout: Duration,
    pub default_seller: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            extract_timeout: Duration::from_secs(60),
            default_seller: DEFAULT_SELLER_NAME.to_string(),
        }
    }
}

/// What an adapter should show the operator after an event.
///
/// `toast` answers a button press (as an alert when `alert` is set);
/// `message` is a Markdown reply in the conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Feedback {
    pub toast: Option<String>,
    pub alert: bool,
    pub message: Option<String>,
}

impl Feedback {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn toast(text: impl Into<String>) -> Self {
        Self {
            toast: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            toast: Some(text.into()),
            alert: true,
            message: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Result of applying free text to the awaited field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldOutcome {
    Applied(DraftField),
    Rejected(FieldError),
}

/// A fan-out running in the background.
pub struct BroadcastHandle {
    targets: usize,
    handle: JoinHandle<DeliveryReport>,
}

impl BroadcastHandle {
    /// Number of destinations the selector resolved to.
    pub fn target_count(&self) -> usize {
        self.targets
    }

    /// Wait for the fan-out to finish.
    pub async fn report(self) -> Result<DeliveryReport> {
        self.handle
            .await
            .map_err(|e| Error::External(format!("broadcast task failed: {e}")))
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ConversationEngine {
    publisher: Arc<dyn PublishPort>,
    extractor: Arc<dyn ProductExtractor>,
    registry: Arc<DestinationRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    sessions: SessionStore,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        publisher: Arc<dyn PublishPort>,
        extractor: Arc<dyn ProductExtractor>,
        registry: Arc<DestinationRegistry>,
        dispatcher: Arc<BroadcastDispatcher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            publisher,
            extractor,
            registry,
            dispatcher,
            sessions: SessionStore::default(),
            settings,
        }
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn routed_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.dispatcher.has_route(*p))
            .collect()
    }

    fn main_menu_for(&self, draft: &Draft) -> InlineKeyboard {
        main_menu(draft.from_price_mode, &self.routed_platforms())
    }

    async fn session(
        &self,
        chat_id: ChatId,
    ) -> Result<Arc<tokio::sync::Mutex<ConversationSession>>> {
        self.sessions
            .get(chat_id)
            .await
            .ok_or(Error::NoActiveSession)
    }

    /// Extract the listing, publish the card and start a fresh session.
    ///
    /// Any previous session of the chat is replaced.
    pub async fn start_composition(
        &self,
        chat_id: ChatId,
        request: ComposeRequest,
    ) -> Result<MessageRef> {
        let timeout = self.settings.extract_timeout;
        info!(chat_id = chat_id.0, url = %request.shared_url, "composition started");

        let record = match tokio::time::timeout(
            timeout,
            self.extractor.extract(&request.shared_url, timeout),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => return Err(ExtractionError::Timeout(timeout).into()),
        };

        let mut draft = Draft::from_product(
            record,
            request.affiliate_url,
            &self.settings.default_seller,
        );
        draft.coupon_code = request.coupon;
        draft.pix_info = request.pix;

        let text = render(&draft);
        let menu = self.main_menu_for(&draft);
        let message = match self
            .publisher
            .publish_new(chat_id, &text, draft.image_url.as_deref(), &menu)
            .await
        {
            Ok(m) => m,
            Err(e) if draft.image_url.is_some() => {
                warn!(chat_id = chat_id.0, error = %e, "photo card rejected, publishing text only");
                self.publisher.publish_new(chat_id, &text, None, &menu).await?
            }
            Err(e) => return Err(e),
        };

        self.sessions
            .replace(chat_id, ConversationSession::new(draft, message))
            .await;
        Ok(message)
    }

    /// Whether the chat's session is waiting for free text.
    pub async fn awaits_input(&self, chat_id: ChatId) -> bool {
        match self.sessions.get(chat_id).await {
            Some(session) => session.lock().await.state.awaited_field().is_some(),
            None => false,
        }
    }

    /// Mark `field` as awaiting input and return the prompt to show.
    pub async fn request_field_edit(
        &self,
        chat_id: ChatId,
        field: DraftField,
    ) -> Result<&'static str> {
        let session = self.session(chat_id).await?;
        let mut s = session.lock().await;
        s.state = EditState::AwaitingInput(field);
        debug!(chat_id = chat_id.0, field = %field, "awaiting field input");
        Ok(field.prompt())
    }

    pub async fn toggle_from_price_mode(&self, chat_id: ChatId) -> Result<()> {
        let session = self.session(chat_id).await?;
        let mut s = session.lock().await;
        s.draft.toggle_from_price_mode();
        self.refresh_card(&mut s).await
    }

    /// Apply free text to the awaited field and re-render the card.
    ///
    /// A number that does not parse is dropped without touching the draft.
    pub async fn apply_field_input(&self, chat_id: ChatId, raw: &str) -> Result<FieldOutcome> {
        let session = self
            .sessions
            .get(chat_id)
            .await
            .ok_or(Error::NoPendingField)?;
        let mut s = session.lock().await;
        let field = s.state.awaited_field().ok_or(Error::NoPendingField)?;
        s.state = EditState::Composing;

        if let Err(err) = s.draft.set_field(field, raw) {
            debug!(chat_id = chat_id.0, error = %err, "field input rejected");
            if matches!(err, FieldError::InvalidNumber { .. }) {
                self.refresh_card(&mut s).await?;
            }
            return Ok(FieldOutcome::Rejected(err));
        }

        if field == DraftField::Image {
            self.replace_image(&mut s).await?;
        } else {
            self.refresh_card(&mut s).await?;
        }
        Ok(FieldOutcome::Applied(field))
    }

    fn fits_caption(&self, text: &str) -> bool {
        self.publisher
            .caption_limit()
            .map_or(true, |limit| text.chars().count() <= limit)
    }

    async fn refresh_card(&self, s: &mut ConversationSession) -> Result<()> {
        let text = render(&s.draft);
        let menu = self.main_menu_for(&s.draft);
        if s.message.has_media && !self.fits_caption(&text) {
            debug!(chat_id = s.message.chat_id.0, "card outgrew its caption, republishing as text");
            s.message = self
                .publisher
                .publish_new(s.message.chat_id, &text, None, &menu)
                .await?;
            return Ok(());
        }
        self.publisher.edit_caption(s.message, &text, &menu).await
    }

    // Photo and text cards are different message kinds; switching kind means
    // a new card that becomes the session handle.
    async fn replace_image(&self, s: &mut ConversationSession) -> Result<()> {
        let text = render(&s.draft);
        let menu = self.main_menu_for(&s.draft);
        let chat_id = s.message.chat_id;
        let fits = self.fits_caption(&text);

        match (s.draft.image_url.clone(), s.message.has_media) {
            (Some(url), true) if fits => {
                self.publisher
                    .edit_media(s.message, &url, &text, &menu)
                    .await
            }
            (Some(url), false) if fits => {
                s.message = self
                    .publisher
                    .publish_new(chat_id, &text, Some(&url), &menu)
                    .await?;
                Ok(())
            }
            (_, true) => {
                s.message = self.publisher.publish_new(chat_id, &text, None, &menu).await?;
                Ok(())
            }
            (_, false) => self.publisher.edit_caption(s.message, &text, &menu).await,
        }
    }

    /// Start a fan-out of the current card and return immediately.
    ///
    /// The delivery report is sent to the conversation when the fan-out ends.
    pub async fn select_broadcast_target(
        &self,
        chat_id: ChatId,
        selector: TargetSelector,
    ) -> Result<BroadcastHandle> {
        let session = self.session(chat_id).await?;
        let (message, counter) = {
            let s = session.lock().await;
            (RenderedMessage::from_draft(&s.draft), s.in_flight_counter())
        };

        let targets = selector.resolve(&self.registry).await?;
        let count = targets.len();
        info!(chat_id = chat_id.0, targets = count, "broadcast started");

        let guard = InFlight::enter(counter);
        let dispatcher = self.dispatcher.clone();
        let publisher = self.publisher.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let report = dispatcher.broadcast(&message, targets).await;
            if !report.is_empty() {
                if let Err(e) = publisher.notify(chat_id, &report.summary()).await {
                    warn!(chat_id = chat_id.0, error = %e, "failed to send delivery report");
                }
            }
            report
        });

        Ok(BroadcastHandle {
            targets: count,
            handle,
        })
    }

    /// Swap the card's buttons for the destination picker of `platform`.
    pub async fn open_target_menu(&self, chat_id: ChatId, platform: Platform) -> Result<()> {
        let session = self.session(chat_id).await?;
        let s = session.lock().await;
        let destinations = self.registry.list_platform(platform).await;
        self.publisher
            .edit_menu(s.message, &targets_menu(platform, &destinations))
            .await
    }

    pub async fn back_to_main_menu(&self, chat_id: ChatId) -> Result<()> {
        let session = self.session(chat_id).await?;
        let s = session.lock().await;
        self.publisher
            .edit_menu(s.message, &self.main_menu_for(&s.draft))
            .await
    }

    /// Returns `false` when the destination was already registered.
    pub async fn register_destination(
        &self,
        platform: Platform,
        id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<bool> {
        self.registry
            .register(Destination::new(platform, id, display_name))
            .await
    }

    /// Markdown listing of every registered destination.
    pub async fn destinations_listing(&self) -> String {
        let all = self.registry.list().await;
        if all.is_empty() {
            return "Nenhum grupo registrado ainda.".to_string();
        }

        let mut out = String::from("Grupos registrados:\n\n");
        for d in all {
            out.push_str(&format!(
                "- {} ({}, ID: `{}`)\n",
                escape_markdown(&d.display_name),
                d.platform.label(),
                d.id.replace('`', "")
            ));
        }
        out
    }

    /// `/promo ...` from the operator.
    pub async fn new_composition(&self, chat_id: ChatId, raw_text: &str) -> Feedback {
        let Some(request) = ComposeRequest::parse(raw_text) else {
            return Feedback::message(escape_markdown(USAGE));
        };

        if let Err(e) = self
            .publisher
            .notify(chat_id, "⏳ Buscando dados do produto...")
            .await
        {
            warn!(chat_id = chat_id.0, error = %e, "progress notice failed");
        }

        match self.start_composition(chat_id, request).await {
            Ok(_) => Feedback::none(),
            Err(e) => {
                warn!(chat_id = chat_id.0, error = %e, "composition failed");
                Feedback::message(format!(
                    "Não consegui gerar a promoção 😥\n{}\nConfere o link e tenta de novo.",
                    escape_markdown(&e.to_string())
                ))
            }
        }
    }

    /// A menu button was pressed.
    pub async fn button_pressed(&self, chat_id: ChatId, action_id: &str) -> Feedback {
        let action = match action_id.parse::<Action>() {
            Ok(a) => a,
            Err(e) => {
                debug!(chat_id = chat_id.0, error = %e, "ignoring button");
                return Feedback::none();
            }
        };
        debug!(chat_id = chat_id.0, action = %action, "button pressed");

        let result = match action {
            Action::ComingSoon(upcoming) => return Feedback::alert(upcoming.notice()),
            Action::Broadcast(TargetSelector::NoneRegistered) => {
                return Feedback::alert(NO_DESTINATIONS)
            }
            Action::Edit(field) => self
                .request_field_edit(chat_id, field)
                .await
                .map(|prompt| Feedback::message(prompt)),
            Action::ToggleFromPrice => self
                .toggle_from_price_mode(chat_id)
                .await
                .map(|_| Feedback::toast("Atualizado ✅")),
            Action::OpenTargets(platform) => self
                .open_target_menu(chat_id, platform)
                .await
                .map(|_| Feedback::message("Selecione os grupos para enviar a promoção:")),
            Action::MainMenu => self
                .back_to_main_menu(chat_id)
                .await
                .map(|_| Feedback::toast("Voltando para as opções da promoção")),
            Action::Broadcast(selector) => self
                .select_broadcast_target(chat_id, selector)
                .await
                .map(|handle| match handle.target_count() {
                    0 => Feedback::alert(NO_DESTINATIONS),
                    1 => Feedback::toast("Enviando para 1 grupo... 🚀"),
                    n => Feedback::toast(format!("Enviando para {n} grupos... 🚀")),
                }),
        };

        match result {
            Ok(feedback) => feedback,
            Err(Error::NoActiveSession) => Feedback::alert(NEED_SESSION),
            Err(Error::UnknownDestination(_)) => Feedback::alert("Grupo não encontrado na lista."),
            Err(e) => {
                warn!(chat_id = chat_id.0, error = %e, "button action failed");
                Feedback::alert(format!("Não consegui atualizar o card 😥\n{e}"))
            }
        }
    }

    /// Free text from the operator (not a command).
    pub async fn free_text_received(&self, chat_id: ChatId, text: &str) -> Feedback {
        let field = match self.sessions.get(chat_id).await {
            Some(session) => session.lock().await.state.awaited_field(),
            None => None,
        };
        match self.apply_field_input(chat_id, text).await {
            Ok(FieldOutcome::Applied(DraftField::Image)) => Feedback::message("Imagem atualizada ✅"),
            Ok(FieldOutcome::Applied(_)) => Feedback::message("Card atualizado ✅"),
            Ok(FieldOutcome::Rejected(FieldError::InvalidNumber { .. })) => Feedback::none(),
            Ok(FieldOutcome::Rejected(FieldError::InvalidUrl(_))) => Feedback::message(
                "Essa não parece uma URL de imagem válida. Toque em 🖼 Alterar imagem e envie um link http(s) direto.",
            ),
            Err(Error::NoPendingField) => Feedback::message(escape_markdown(HINT)),
            Err(e) => {
                warn!(chat_id = chat_id.0, error = %e, "field update failed");
                let what = field.map(|f| f.label()).unwrap_or("card");
                Feedback::message(format!(
                    "Não consegui atualizar o card ({}) 😥\n{}",
                    escape_markdown(what),
                    escape_markdown(&e.to_string())
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcast::DeliveryError,
        domain::{DestinationKey, MessageId},
        draft::Installments,
        extractor::ProductRecord,
        messaging::port::DeliveryPort,
        registry::MemoryStore,
    };
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::{atomic::AtomicI32, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Publish {
            text: String,
            image: Option<String>,
            menu: InlineKeyboard,
        },
        EditCaption {
            msg: MessageRef,
            text: String,
        },
        EditMedia {
            msg: MessageRef,
            image: String,
        },
        EditMenu {
            msg: MessageRef,
            menu: InlineKeyboard,
        },
        Notify(String),
    }

    struct FakePublisher {
        calls: Mutex<Vec<Call>>,
        next_id: AtomicI32,
        reject_photos: bool,
        fail_edits: bool,
        caption_limit: Option<usize>,
    }

    impl FakePublisher {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                next_id: AtomicI32::new(100),
                reject_photos: false,
                fail_edits: false,
                caption_limit: None,
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn notices(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Notify(t) => Some(t),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl PublishPort for FakePublisher {
        async fn publish_new(
            &self,
            chat_id: ChatId,
            text: &str,
            image_url: Option<&str>,
            menu: &InlineKeyboard,
        ) -> Result<MessageRef> {
            if image_url.is_some() && self.reject_photos {
                return Err(Error::External("wrong file identifier".to_string()));
            }
            self.calls.lock().unwrap().push(Call::Publish {
                text: text.to_string(),
                image: image_url.map(str::to_string),
                menu: menu.clone(),
            });
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)),
                has_media: image_url.is_some(),
            })
        }

        async fn edit_caption(
            &self,
            msg: MessageRef,
            text: &str,
            _menu: &InlineKeyboard,
        ) -> Result<()> {
            if self.fail_edits {
                return Err(Error::External("message to edit not found".to_string()));
            }
            self.calls.lock().unwrap().push(Call::EditCaption {
                msg,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn edit_media(
            &self,
            msg: MessageRef,
            image_url: &str,
            _text: &str,
            _menu: &InlineKeyboard,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(Call::EditMedia {
                msg,
                image: image_url.to_string(),
            });
            Ok(())
        }

        async fn edit_menu(&self, msg: MessageRef, menu: &InlineKeyboard) -> Result<()> {
            self.calls.lock().unwrap().push(Call::EditMenu {
                msg,
                menu: menu.clone(),
            });
            Ok(())
        }

        async fn notify(&self, _chat_id: ChatId, text: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Notify(text.to_string()));
            Ok(())
        }

        fn caption_limit(&self) -> Option<usize> {
            self.caption_limit
        }
    }

    struct FakeExtractor {
        result: std::result::Result<ProductRecord, ExtractionError>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProductExtractor for FakeExtractor {
        async fn extract(
            &self,
            url: &str,
            _timeout: Duration,
        ) -> std::result::Result<ProductRecord, ExtractionError> {
            self.urls.lock().unwrap().push(url.to_string());
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct FakeDelivery {
        fail_ids: Vec<String>,
        sent: Mutex<Vec<String>>,
        // Sends wait for a permit when set.
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    #[async_trait]
    impl DeliveryPort for FakeDelivery {
        fn platform(&self) -> Platform {
            Platform::Telegram
        }

        async fn send_to(
            &self,
            destination: &Destination,
            _text: &str,
            _image_url: Option<&str>,
        ) -> std::result::Result<(), DeliveryError> {
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| DeliveryError::Unreachable(e.to_string()))?
                    .forget();
            }
            if self.fail_ids.contains(&destination.id) {
                return Err(DeliveryError::Rejected("chat not found".to_string()));
            }
            self.sent.lock().unwrap().push(destination.id.clone());
            Ok(())
        }
    }

    const CHAT: ChatId = ChatId(42);

    fn shoes() -> ProductRecord {
        ProductRecord {
            title: "Shoes".to_string(),
            price: Some(Decimal::new(12990, 2)),
            original_price: Some(Decimal::new(15990, 2)),
            installments: Installments::new(3, Decimal::new(4330, 2)),
            image_url: Some("https://img/shoes.jpg".to_string()),
            seller_name: Some("Acme".to_string()),
        }
    }

    struct Harness {
        engine: ConversationEngine,
        publisher: Arc<FakePublisher>,
        delivery: Arc<FakeDelivery>,
    }

    fn harness_with(
        record: std::result::Result<ProductRecord, ExtractionError>,
        publisher: FakePublisher,
        destinations: Vec<Destination>,
        fail_ids: &[&str],
    ) -> Harness {
        let delivery = FakeDelivery {
            fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
            ..FakeDelivery::default()
        };
        harness_full(record, publisher, destinations, delivery)
    }

    fn harness_full(
        record: std::result::Result<ProductRecord, ExtractionError>,
        publisher: FakePublisher,
        destinations: Vec<Destination>,
        delivery: FakeDelivery,
    ) -> Harness {
        let publisher = Arc::new(publisher);
        let delivery = Arc::new(delivery);
        let dispatcher = BroadcastDispatcher::new(4, Duration::from_secs(5))
            .with_route(delivery.clone() as Arc<dyn DeliveryPort>);
        let engine = ConversationEngine::new(
            publisher.clone(),
            Arc::new(FakeExtractor {
                result: record,
                urls: Mutex::new(Vec::new()),
            }),
            Arc::new(DestinationRegistry::load(MemoryStore::with(destinations))),
            Arc::new(dispatcher),
            EngineSettings::default(),
        );
        Harness {
            engine,
            publisher,
            delivery,
        }
    }

    fn harness(destinations: Vec<Destination>) -> Harness {
        harness_with(Ok(shoes()), FakePublisher::new(), destinations, &[])
    }

    fn groups(n: usize) -> Vec<Destination> {
        (1..=n)
            .map(|i| Destination::new(Platform::Telegram, format!("-{i}"), format!("Grupo {i}")))
            .collect()
    }

    async fn draft_of(engine: &ConversationEngine) -> Draft {
        let s = engine.sessions().get(CHAT).await.unwrap();
        let s = s.lock().await;
        s.draft.clone()
    }

    async fn state_of(engine: &ConversationEngine) -> EditState {
        let s = engine.sessions().get(CHAT).await.unwrap();
        let s = s.lock().await;
        s.state
    }

    #[tokio::test]
    async fn composition_publishes_photo_card_with_main_menu() {
        let h = harness(vec![]);
        let req = ComposeRequest::parse("/promo https://meli.la/x https://aff/y cupom=OFF10").unwrap();
        let msg = h.engine.start_composition(CHAT, req).await.unwrap();
        assert!(msg.has_media);

        let calls = h.publisher.calls();
        let Call::Publish { text, image, menu } = &calls[0] else {
            panic!("expected publish, got {calls:?}");
        };
        assert_eq!(image.as_deref(), Some("https://img/shoes.jpg"));
        assert!(text.contains("Por R$ 129,90"));
        assert!(text.contains("📄 Utilize o Cupom: *OFF10*"));
        assert!(text.contains("https://aff/y"));
        assert!(menu.callbacks().any(|c| c == "edit:title"));
        assert!(menu.callbacks().any(|c| c == "menu:targets:telegram"));

        assert_eq!(state_of(&h.engine).await, EditState::Composing);
    }

    #[tokio::test]
    async fn rejected_photo_falls_back_to_text_card() {
        let publisher = FakePublisher {
            reject_photos: true,
            ..FakePublisher::new()
        };
        let h = harness_with(Ok(shoes()), publisher, vec![], &[]);
        let msg = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        assert!(!msg.has_media);
    }

    #[tokio::test]
    async fn extraction_failure_is_reported() {
        let h = harness_with(
            Err(ExtractionError::NotFound("https://meli.la/x".to_string())),
            FakePublisher::new(),
            vec![],
            &[],
        );
        let err = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CompositionFailed(ExtractionError::NotFound(_))
        ));
        assert!(h.engine.sessions().is_empty().await);

        let fb = h.engine.new_composition(CHAT, "/promo https://meli.la/x").await;
        assert!(fb.message.unwrap().starts_with("Não consegui gerar a promoção"));
        assert_eq!(h.publisher.notices(), vec!["⏳ Buscando dados do produto..."]);
    }

    #[tokio::test]
    async fn compose_without_url_returns_usage() {
        let h = harness(vec![]);
        let fb = h.engine.new_composition(CHAT, "/promo").await;
        assert!(fb.message.unwrap().contains("link\\_compartilhado\\_do\\_produto"));
        assert!(h.publisher.calls().is_empty());
    }

    #[tokio::test]
    async fn field_input_without_cursor_is_rejected() {
        let h = harness(vec![]);
        assert!(matches!(
            h.engine.apply_field_input(CHAT, "x").await,
            Err(Error::NoPendingField)
        ));

        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        assert!(matches!(
            h.engine.apply_field_input(CHAT, "x").await,
            Err(Error::NoPendingField)
        ));
        let fb = h.engine.free_text_received(CHAT, "oi").await;
        assert!(fb.message.unwrap().starts_with("Pra gerar uma oferta"));
    }

    #[tokio::test]
    async fn title_edit_updates_card_and_clears_cursor() {
        let h = harness(vec![]);
        let msg = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();

        let prompt = h
            .engine
            .request_field_edit(CHAT, DraftField::Title)
            .await
            .unwrap();
        assert_eq!(prompt, DraftField::Title.prompt());
        assert_eq!(
            state_of(&h.engine).await,
            EditState::AwaitingInput(DraftField::Title)
        );
        assert!(h.engine.awaits_input(CHAT).await);

        let fb = h.engine.free_text_received(CHAT, "New Name").await;
        assert_eq!(fb, Feedback::message("Card atualizado ✅"));
        assert_eq!(draft_of(&h.engine).await.title, "New Name");
        assert_eq!(state_of(&h.engine).await, EditState::Composing);

        let calls = h.publisher.calls();
        let Some(Call::EditCaption { msg: edited, text }) = calls.last() else {
            panic!("expected caption edit, got {calls:?}");
        };
        assert_eq!(*edited, msg);
        assert!(text.starts_with("*New Name*"));
    }

    #[tokio::test]
    async fn last_field_request_wins() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine.button_pressed(CHAT, "edit:title").await;
        h.engine.button_pressed(CHAT, "edit:coupon").await;
        h.engine.free_text_received(CHAT, "DESCONTO").await;

        let d = draft_of(&h.engine).await;
        assert_eq!(d.title, "Shoes");
        assert_eq!(d.coupon_code.as_deref(), Some("DESCONTO"));
    }

    #[tokio::test]
    async fn invalid_price_is_a_silent_no_op() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine
            .request_field_edit(CHAT, DraftField::Price)
            .await
            .unwrap();

        let fb = h.engine.free_text_received(CHAT, "abc").await;
        assert_eq!(fb, Feedback::none());
        assert_eq!(draft_of(&h.engine).await.price, Some(Decimal::new(12990, 2)));
        assert_eq!(state_of(&h.engine).await, EditState::Composing);
    }

    #[tokio::test]
    async fn price_accepts_comma_input() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine.button_pressed(CHAT, "edit:price").await;
        h.engine.free_text_received(CHAT, "99,90").await;
        assert_eq!(draft_of(&h.engine).await.price, Some(Decimal::new(9990, 2)));
    }

    #[tokio::test]
    async fn toggle_rerenders_with_from_label() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        let fb = h.engine.button_pressed(CHAT, "toggle:from_price").await;
        assert_eq!(fb, Feedback::toast("Atualizado ✅"));

        let calls = h.publisher.calls();
        let Some(Call::EditCaption { text, .. }) = calls.last() else {
            panic!("expected caption edit");
        };
        assert!(text.contains("A partir de R$ 129,90"));
    }

    #[tokio::test]
    async fn image_on_photo_card_edits_media() {
        let h = harness(vec![]);
        let msg = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine.button_pressed(CHAT, "edit:image").await;
        let fb = h.engine.free_text_received(CHAT, "https://img/new.png").await;
        assert_eq!(fb, Feedback::message("Imagem atualizada ✅"));

        assert_eq!(
            h.publisher.calls().last(),
            Some(&Call::EditMedia {
                msg,
                image: "https://img/new.png".to_string()
            })
        );
    }

    #[tokio::test]
    async fn image_on_text_card_publishes_new_photo_card() {
        let record = ProductRecord {
            image_url: None,
            ..shoes()
        };
        let h = harness_with(Ok(record), FakePublisher::new(), vec![], &[]);
        let first = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        assert!(!first.has_media);

        h.engine.button_pressed(CHAT, "edit:image").await;
        h.engine.free_text_received(CHAT, "https://img/new.png").await;

        let s = h.engine.sessions().get(CHAT).await.unwrap();
        let s = s.lock().await;
        assert!(s.message.has_media);
        assert_ne!(s.message.message_id, first.message_id);
    }

    #[tokio::test]
    async fn bad_image_url_keeps_previous_image() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine.button_pressed(CHAT, "edit:image").await;
        let fb = h.engine.free_text_received(CHAT, "not a url").await;
        assert!(fb.message.unwrap().contains("URL de imagem"));
        assert_eq!(
            draft_of(&h.engine).await.image_url.as_deref(),
            Some("https://img/shoes.jpg")
        );
    }

    #[tokio::test]
    async fn broadcast_isolates_failures_and_reports_back() {
        let h = harness_with(Ok(shoes()), FakePublisher::new(), groups(4), &["-3"]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();

        let handle = h
            .engine
            .select_broadcast_target(CHAT, TargetSelector::All)
            .await
            .unwrap();
        assert_eq!(handle.target_count(), 4);
        let report = handle.report().await.unwrap();

        assert_eq!(report.succeeded.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].destination.display_name, "Grupo 3");
        assert_eq!(h.delivery.sent.lock().unwrap().len(), 3);

        let notices = h.publisher.notices();
        assert!(notices.last().unwrap().contains("3/4"));
        assert!(notices.last().unwrap().contains("Grupo 3"));

        let s = h.engine.sessions().get(CHAT).await.unwrap();
        assert_eq!(s.lock().await.broadcasts_in_flight(), 0);
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry_is_not_an_error() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();

        let handle = h
            .engine
            .select_broadcast_target(CHAT, TargetSelector::All)
            .await
            .unwrap();
        assert!(handle.report().await.unwrap().is_empty());
        assert!(h.publisher.notices().is_empty());

        let fb = h.engine.button_pressed(CHAT, "broadcast:all:telegram").await;
        assert!(fb.alert);
        assert_eq!(fb.toast.as_deref(), Some(NO_DESTINATIONS));
    }

    #[tokio::test]
    async fn single_target_button() {
        let h = harness(groups(2));
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();

        let fb = h
            .engine
            .button_pressed(CHAT, "broadcast:target:telegram:-2")
            .await;
        assert_eq!(fb, Feedback::toast("Enviando para 1 grupo... 🚀"));

        let missing = h
            .engine
            .select_broadcast_target(
                CHAT,
                TargetSelector::Single(DestinationKey::new(Platform::Telegram, "-9")),
            )
            .await;
        assert!(matches!(missing, Err(Error::UnknownDestination(_))));
        let fb = h
            .engine
            .button_pressed(CHAT, "broadcast:target:telegram:-9")
            .await;
        assert_eq!(fb, Feedback::alert("Grupo não encontrado na lista."));
    }

    #[tokio::test]
    async fn buttons_without_session_ask_for_promo() {
        let h = harness(groups(1));
        for id in ["edit:title", "toggle:from_price", "broadcast:all", "menu:main"] {
            assert_eq!(
                h.engine.button_pressed(CHAT, id).await,
                Feedback::alert(NEED_SESSION),
                "{id}"
            );
        }
        assert!(h.delivery.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn placeholder_buttons() {
        let h = harness(vec![]);
        assert_eq!(
            h.engine.button_pressed(CHAT, "soon:site").await,
            Feedback::alert("Em breve: integração com site (modo teste) 😄")
        );
        assert_eq!(
            h.engine.button_pressed(CHAT, "broadcast:none").await,
            Feedback::alert(NO_DESTINATIONS)
        );
        assert_eq!(h.engine.button_pressed(CHAT, "opt_nome").await, Feedback::none());
    }

    #[tokio::test]
    async fn target_menu_round_trip() {
        let h = harness(groups(3));
        let msg = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();

        let fb = h.engine.button_pressed(CHAT, "menu:targets:telegram").await;
        assert_eq!(
            fb.message.as_deref(),
            Some("Selecione os grupos para enviar a promoção:")
        );
        let calls = h.publisher.calls();
        let Some(Call::EditMenu { msg: edited, menu }) = calls.last() else {
            panic!("expected menu edit");
        };
        assert_eq!(*edited, msg);
        assert_eq!(menu.rows[0][0].callback_data, "broadcast:all:telegram");

        h.engine.button_pressed(CHAT, "menu:main").await;
        let calls = h.publisher.calls();
        let Some(Call::EditMenu { menu, .. }) = calls.last() else {
            panic!("expected menu edit");
        };
        assert!(menu.callbacks().any(|c| c == "edit:title"));
    }

    #[tokio::test]
    async fn registration_and_listing() {
        let h = harness(vec![]);
        assert_eq!(
            h.engine.destinations_listing().await,
            "Nenhum grupo registrado ainda."
        );
        assert!(h
            .engine
            .register_destination(Platform::Telegram, "-100", "Ofertas_BR")
            .await
            .unwrap());
        assert!(!h
            .engine
            .register_destination(Platform::Telegram, "-100", "Outro")
            .await
            .unwrap());

        let listing = h.engine.destinations_listing().await;
        assert_eq!(
            listing,
            "Grupos registrados:\n\n- Ofertas\\_BR (Telegram, ID: `-100`)\n"
        );
    }

    #[tokio::test]
    async fn new_composition_replaces_session() {
        let h = harness(vec![]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine.button_pressed(CHAT, "edit:title").await;
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/y"))
            .await
            .unwrap();
        assert_eq!(state_of(&h.engine).await, EditState::Composing);
        assert_eq!(h.engine.sessions().len().await, 1);
    }

    #[tokio::test]
    async fn edits_proceed_while_broadcast_is_in_flight() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let delivery = FakeDelivery {
            gate: Some(gate.clone()),
            ..FakeDelivery::default()
        };
        let h = harness_full(Ok(shoes()), FakePublisher::new(), groups(2), delivery);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();

        let handle = h
            .engine
            .select_broadcast_target(CHAT, TargetSelector::All)
            .await
            .unwrap();
        let session = h.engine.sessions().get(CHAT).await.unwrap();
        assert_eq!(session.lock().await.broadcasts_in_flight(), 1);
        assert!(session.lock().await.is_broadcasting());

        h.engine
            .request_field_edit(CHAT, DraftField::Title)
            .await
            .unwrap();
        let fb = h.engine.free_text_received(CHAT, "Tênis Novo").await;
        assert_eq!(fb, Feedback::message("Card atualizado ✅"));
        assert_eq!(draft_of(&h.engine).await.title, "Tênis Novo");
        assert!(h.delivery.sent.lock().unwrap().is_empty());
        assert_eq!(session.lock().await.broadcasts_in_flight(), 1);

        gate.add_permits(2);
        let report = handle.report().await.unwrap();
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(session.lock().await.broadcasts_in_flight(), 0);
    }

    #[tokio::test]
    async fn long_photo_card_is_republished_as_text() {
        let publisher = FakePublisher {
            caption_limit: Some(1024),
            ..FakePublisher::new()
        };
        let h = harness_with(Ok(shoes()), publisher, vec![], &[]);
        let first = h
            .engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        assert!(first.has_media);

        h.engine.button_pressed(CHAT, "edit:notes").await;
        h.engine.free_text_received(CHAT, &"x".repeat(950)).await;

        let calls = h.publisher.calls();
        let Some(Call::Publish { text, image, .. }) = calls.last() else {
            panic!("expected a new text card, got {:?}", calls.last());
        };
        assert!(image.is_none());
        assert!(text.contains("🔗 Link do Produto:\nhttps://meli.la/x"));
        assert!(text.ends_with("Vendido por: *Acme*"));

        let current = {
            let s = h.engine.sessions().get(CHAT).await.unwrap();
            let s = s.lock().await;
            s.message
        };
        assert!(!current.has_media);
        assert_ne!(current.message_id, first.message_id);

        // Still too long for a caption: the image change stays on the text card.
        h.engine.button_pressed(CHAT, "edit:image").await;
        h.engine.free_text_received(CHAT, "https://img/new.png").await;
        let calls = h.publisher.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::EditMedia { .. })));
        let Some(Call::EditCaption { msg, text }) = calls.last() else {
            panic!("expected caption edit, got {:?}", calls.last());
        };
        assert_eq!(*msg, current);
        assert!(text.ends_with("Vendido por: *Acme*"));
    }

    #[tokio::test]
    async fn failed_card_update_names_field_and_cause() {
        let publisher = FakePublisher {
            fail_edits: true,
            ..FakePublisher::new()
        };
        let h = harness_with(Ok(shoes()), publisher, vec![], &[]);
        h.engine
            .start_composition(CHAT, ComposeRequest::new("https://meli.la/x"))
            .await
            .unwrap();
        h.engine.button_pressed(CHAT, "edit:top_message").await;

        let msg = h
            .engine
            .free_text_received(CHAT, "Corre!")
            .await
            .message
            .unwrap();
        assert!(msg.starts_with("Não consegui atualizar o card (📢 Mensagem do topo)"), "{msg}");
        assert!(msg.contains("message to edit not found"), "{msg}");
    }
}
