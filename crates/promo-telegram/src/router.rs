use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use promo_core::{
    broadcast::BroadcastDispatcher,
    config::Config,
    conversation::ConversationEngine,
    domain::Platform,
    messaging::{
        port::DeliveryPort,
        throttled::ThrottledDelivery,
    },
    registry::{Destination, DestinationRegistry, JsonFileStore},
};
use promo_scraper::HttpProductExtractor;
use promo_whatsapp::WhatsAppRelay;

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub engine: Arc<ConversationEngine>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Per-chat serialization of inbound updates.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Register the WhatsApp groups named in configuration.
async fn seed_whatsapp_groups(registry: &DestinationRegistry, names: &[String]) {
    for name in names {
        let dest = Destination::new(Platform::WhatsApp, name.clone(), name.clone());
        match registry.register(dest).await {
            Ok(true) => info!(group = %name, "whatsapp group registered from config"),
            Ok(false) => {}
            Err(e) => warn!(group = %name, error = %e, "failed to persist whatsapp group"),
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "PromoRadar started"),
        Err(e) => warn!(error = %e, "getMe failed"),
    }

    let telegram = Arc::new(TelegramMessenger::new(bot.clone()));

    let registry = Arc::new(DestinationRegistry::load(JsonFileStore::new(
        cfg.registry_file.clone(),
    )));
    seed_whatsapp_groups(&registry, &cfg.whatsapp_groups).await;
    info!(
        destinations = registry.len().await,
        file = %cfg.registry_file.display(),
        "destination registry ready"
    );

    // Throttle outbound fan-out; the Telegram adapter still retries once on 429.
    let telegram_delivery: Arc<dyn DeliveryPort> =
        Arc::new(ThrottledDelivery::new(telegram.clone(), cfg.throttle()));
    let mut dispatcher =
        BroadcastDispatcher::new(cfg.broadcast_max_in_flight, cfg.delivery_timeout)
            .with_route(telegram_delivery);

    match &cfg.whats_relay_url {
        Some(url) => {
            let relay: Arc<dyn DeliveryPort> = Arc::new(WhatsAppRelay::new(url.clone())?);
            dispatcher =
                dispatcher.with_route(Arc::new(ThrottledDelivery::new(relay, cfg.throttle())));
            info!(relay = %url, "whatsapp delivery enabled");
        }
        None => info!("WHATS_RELAY_URL not set, whatsapp delivery disabled"),
    }

    let broadcast_shutdown = dispatcher.shutdown_token();
    let extractor = Arc::new(HttpProductExtractor::new()?);

    let engine = Arc::new(ConversationEngine::new(
        telegram,
        extractor,
        registry,
        Arc::new(dispatcher),
        cfg.engine_settings(),
    ));

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        engine,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut tg_dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    let polling_shutdown = tg_dispatcher.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("shutdown requested");
        broadcast_shutdown.cancel();
        if let Ok(stopped) = polling_shutdown.shutdown() {
            stopped.await;
        }
    });

    tg_dispatcher.dispatch().await;
    Ok(())
}
