//! Destination registry: known broadcast targets, persisted in a JSON file.
//!
//! Reads are concurrent; registration takes the write lock and persists while
//! holding it, so there is a single writer at a time.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    domain::{DestinationKey, Platform},
    errors::Error,
    utils::iso_timestamp_utc,
    Result,
};

/// A registered broadcast target (a group on some platform).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(default = "legacy_platform")]
    pub platform: Platform,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "title")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<String>,
}

impl Destination {
    pub fn new(platform: Platform, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            platform,
            id: id.into(),
            display_name: display_name.into(),
            registered_at: None,
        }
    }

    pub fn key(&self) -> DestinationKey {
        DestinationKey::new(self.platform, self.id.clone())
    }
}

// Files written by the first version of the bot only knew Telegram groups.
fn legacy_platform() -> Platform {
    Platform::Telegram
}

fn string_or_number<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(i64),
        Str(String),
    }

    Ok(match RawId::deserialize(d)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

/// Durable backing store for the registry.
pub trait RegistryStore: Send + Sync {
    fn load(&self) -> Result<Vec<Destination>>;
    fn save(&self, destinations: &[Destination]) -> Result<()>;
}

/// Pretty-printed JSON array on disk.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Destination>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let txt = fs::read_to_string(&self.path)?;
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&txt)?)
    }

    fn save(&self, destinations: &[Destination]) -> Result<()> {
        let txt = serde_json::to_string_pretty(destinations)?;
        // Write-then-rename so a crash never leaves a half-written registry.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, txt)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store (tests, ephemeral runs).
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<Destination>>,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn with(destinations: Vec<Destination>) -> Self {
        Self {
            saved: Mutex::new(destinations),
            fail_saves: false,
        }
    }

    /// A store whose `save` always fails.
    pub fn failing() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail_saves: true,
        }
    }

    pub fn snapshot(&self) -> Vec<Destination> {
        self.saved
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<Vec<Destination>> {
        Ok(self.snapshot())
    }

    fn save(&self, destinations: &[Destination]) -> Result<()> {
        if self.fail_saves {
            return Err(Error::External("memory store configured to fail".to_string()));
        }
        let mut guard = self
            .saved
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))?;
        *guard = destinations.to_vec();
        Ok(())
    }
}

pub struct DestinationRegistry {
    store: Box<dyn RegistryStore>,
    entries: RwLock<Vec<Destination>>,
}

impl DestinationRegistry {
    /// Load the registry from `store`.
    ///
    /// A missing or unreadable store yields an empty registry so the first run
    /// can bootstrap.
    pub fn load(store: impl RegistryStore + 'static) -> Self {
        let entries = match store.load() {
            Ok(mut entries) => {
                dedupe(&mut entries);
                info!(count = entries.len(), "destination registry loaded");
                entries
            }
            Err(e) => {
                warn!(error = %e, "destination registry unreadable, starting empty");
                Vec::new()
            }
        };

        Self {
            store: Box::new(store),
            entries: RwLock::new(entries),
        }
    }

    /// Register a destination; returns `false` if `(platform, id)` was already known.
    ///
    /// The entry is live in memory even when persisting fails; the error is
    /// returned so the caller can tell the operator.
    pub async fn register(&self, mut destination: Destination) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let key = destination.key();
        if entries.iter().any(|d| d.key() == key) {
            return Ok(false);
        }

        if destination.registered_at.is_none() {
            destination.registered_at = Some(iso_timestamp_utc());
        }
        info!(destination = %key, name = %destination.display_name, "destination registered");
        entries.push(destination);

        self.store.save(&entries)?;
        Ok(true)
    }

    /// All destinations in registration order.
    pub async fn list(&self) -> Vec<Destination> {
        self.entries.read().await.clone()
    }

    pub async fn list_platform(&self, platform: Platform) -> Vec<Destination> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|d| d.platform == platform)
            .cloned()
            .collect()
    }

    pub async fn find(&self, key: &DestinationKey) -> Option<Destination> {
        self.entries
            .read()
            .await
            .iter()
            .find(|d| d.platform == key.platform && d.id == key.id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn dedupe(entries: &mut Vec<Destination>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|d| seen.insert(d.key()));
}
