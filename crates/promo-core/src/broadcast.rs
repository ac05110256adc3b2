//! Broadcast dispatcher: fan-out of one rendered card to many destinations.
//!
//! Every target gets its own task; a semaphore caps how many sends are in
//! flight. One destination failing (permissions, network, flood limits) never
//! aborts or delays the others, and there is no retry: the operator re-invokes.

use std::{collections::HashMap, collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    domain::{DestinationKey, Platform},
    errors::Error,
    messaging::port::DeliveryPort,
    registry::{Destination, DestinationRegistry},
    render::{escape_markdown, RenderedMessage},
    utils::truncate_text,
    Result,
};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no delivery adapter configured for {0}")]
    NoRoute(Platform),

    #[error("cancelled before sending")]
    Cancelled,

    #[error("send task failed: {0}")]
    TaskFailed(String),
}

/// Which registered destinations a broadcast goes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetSelector {
    Single(DestinationKey),
    All,
    Platform(Platform),
    /// The operator pressed the placeholder shown when nothing is registered.
    NoneRegistered,
}

impl TargetSelector {
    pub async fn resolve(&self, registry: &DestinationRegistry) -> Result<Vec<Destination>> {
        match self {
            TargetSelector::Single(key) => registry
                .find(key)
                .await
                .map(|d| vec![d])
                .ok_or_else(|| Error::UnknownDestination(key.to_string())),
            TargetSelector::All => Ok(registry.list().await),
            TargetSelector::Platform(p) => Ok(registry.list_platform(*p).await),
            TargetSelector::NoneRegistered => Ok(Vec::new()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedDelivery {
    pub destination: Destination,
    pub error: DeliveryError,
}

/// Outcome of one broadcast, in target order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub succeeded: Vec<Destination>,
    pub failed: Vec<FailedDelivery>,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn succeeded_keys(&self) -> Vec<DestinationKey> {
        self.succeeded.iter().map(Destination::key).collect()
    }

    pub fn failure_for(&self, key: &DestinationKey) -> Option<&DeliveryError> {
        self.failed
            .iter()
            .find(|f| &f.destination.key() == key)
            .map(|f| &f.error)
    }

    /// Operator-facing summary (Markdown) naming every failed destination.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Nenhum grupo registrado para disparo. Adicione o bot em um grupo e mande /registrargrupo."
                .to_string();
        }

        if self.failed.is_empty() && self.succeeded.len() == 1 {
            return format!(
                "Promoção enviada para *{}* ✅",
                self.succeeded[0].display_name.replace('*', "")
            );
        }

        let mut out = format!(
            "📣 Disparo concluído: {}/{} enviados",
            self.succeeded.len(),
            self.total()
        );
        out.push_str(if self.failed.is_empty() { " ✅" } else { " ⚠️" });

        for f in &self.failed {
            out.push_str(&format!(
                "\n❌ {} ({}): {}",
                escape_markdown(&f.destination.display_name),
                f.destination.platform.label(),
                escape_markdown(&truncate_text(&f.error.to_string(), 200))
            ));
        }
        out
    }
}

pub struct BroadcastDispatcher {
    routes: HashMap<Platform, Arc<dyn DeliveryPort>>,
    max_in_flight: usize,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl BroadcastDispatcher {
    pub fn new(max_in_flight: usize, send_timeout: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            max_in_flight: max_in_flight.max(1),
            send_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Route destinations of `port.platform()` through `port`.
    pub fn with_route(mut self, port: Arc<dyn DeliveryPort>) -> Self {
        self.routes.insert(port.platform(), port);
        self
    }

    pub fn has_route(&self, platform: Platform) -> bool {
        self.routes.contains_key(&platform)
    }

    /// Cancelling this token makes sends that have not started yet report
    /// [`DeliveryError::Cancelled`]; sends already in flight finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn broadcast(
        &self,
        message: &RenderedMessage,
        targets: Vec<Destination>,
    ) -> DeliveryReport {
        let mut seen = HashSet::new();
        let targets: Vec<Destination> = targets
            .into_iter()
            .filter(|d| seen.insert(d.key()))
            .collect();

        if targets.is_empty() {
            return DeliveryReport::default();
        }

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let text: Arc<str> = Arc::from(message.text.as_str());
        let image: Option<Arc<str>> = message.image_url.as_deref().map(Arc::from);

        let mut handles = Vec::with_capacity(targets.len());
        for dest in targets {
            let route = self.routes.get(&dest.platform).cloned();
            let permits = permits.clone();
            let cancel = self.shutdown.clone();
            let timeout = self.send_timeout;
            let text = text.clone();
            let image = image.clone();
            let target = dest.clone();

            let handle = tokio::spawn(async move {
                let Some(port) = route else {
                    return Err(DeliveryError::NoRoute(target.platform));
                };

                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                    permit = permits.acquire_owned() => {
                        permit.map_err(|_| DeliveryError::Cancelled)?
                    }
                };
                if cancel.is_cancelled() {
                    return Err(DeliveryError::Cancelled);
                }

                match tokio::time::timeout(timeout, port.send_to(&target, &text, image.as_deref()))
                    .await
                {
                    Ok(res) => res,
                    Err(_) => Err(DeliveryError::Timeout(timeout)),
                }
            });
            handles.push((dest, handle));
        }

        let mut report = DeliveryReport::default();
        for (destination, handle) in handles {
            let outcome = match handle.await {
                Ok(res) => res,
                Err(e) => Err(DeliveryError::TaskFailed(e.to_string())),
            };
            match outcome {
                Ok(()) => report.succeeded.push(destination),
                Err(error) => {
                    warn!(
                        destination = %destination.key(),
                        name = %destination.display_name,
                        error = %error,
                        "delivery failed"
                    );
                    report.failed.push(FailedDelivery { destination, error });
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "broadcast finished"
        );
        report
    }
}
