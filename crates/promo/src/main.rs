use std::sync::Arc;

use tracing::info;

use promo_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), promo_core::Error> {
    promo_core::logging::init("promo")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        registry = %cfg.registry_file.display(),
        whatsapp_relay = cfg.whats_relay_url.is_some(),
        "starting PromoRadar"
    );

    promo_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| promo_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
