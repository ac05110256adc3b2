use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    broadcast::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_SEND_TIMEOUT},
    conversation::EngineSettings,
    draft::DEFAULT_SELLER_NAME,
    errors::Error,
    messaging::throttled::ThrottleConfig,
    Result,
};

/// Typed runtime configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,

    // Destinations
    pub registry_file: PathBuf,
    pub whats_relay_url: Option<String>,
    pub whatsapp_groups: Vec<String>,

    // Composition
    pub extract_timeout: Duration,
    pub default_seller_name: String,

    // Broadcast
    pub broadcast_max_in_flight: usize,
    pub delivery_timeout: Duration,
    pub throttle_global: Duration,
    pub throttle_per_chat: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build from an arbitrary key lookup (the process environment in `load`).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| get("BOT_TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;

        let registry_file = PathBuf::from(
            get("REGISTRY_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "groups.json".to_string()),
        );
        let whats_relay_url = get("WHATS_RELAY_URL")
            .and_then(non_empty)
            .map(|s| s.trim().trim_end_matches('/').to_string());
        let whatsapp_groups = parse_csv(get("WHATSAPP_GROUPS"));

        let extract_timeout = Duration::from_millis(
            parse_u64(get("EXTRACT_TIMEOUT_MS")).unwrap_or(60_000),
        );
        let default_seller_name = get("DEFAULT_SELLER_NAME")
            .and_then(non_empty)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SELLER_NAME.to_string());

        let broadcast_max_in_flight = parse_u64(get("BROADCAST_MAX_IN_FLIGHT"))
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT)
            .max(1);
        let delivery_timeout = parse_u64(get("DELIVERY_TIMEOUT_MS"))
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SEND_TIMEOUT);

        let defaults = ThrottleConfig::default();
        let throttle_global = parse_u64(get("THROTTLE_GLOBAL_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.global_min_interval);
        let throttle_per_chat = parse_u64(get("THROTTLE_PER_CHAT_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.per_destination_min_interval);

        Ok(Self {
            telegram_bot_token,
            registry_file,
            whats_relay_url,
            whatsapp_groups,
            extract_timeout,
            default_seller_name,
            broadcast_max_in_flight,
            delivery_timeout,
            throttle_global,
            throttle_per_chat,
        })
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            global_min_interval: self.throttle_global,
            per_destination_min_interval: self.throttle_per_chat,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            extract_timeout: self.extract_timeout,
            default_seller: self.default_seller_name.clone(),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
