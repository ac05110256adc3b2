use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    broadcast::DeliveryError,
    domain::{DestinationKey, Platform},
    messaging::port::DeliveryPort,
    registry::Destination,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound sends on this platform.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same destination.
    pub per_destination_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_destination_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// DeliveryPort decorator that spaces out sends.
///
/// Best-effort defense against platform flood limits (Telegram 429s) when a
/// broadcast fans out to many groups at once.
pub struct ThrottledDelivery {
    inner: Arc<dyn DeliveryPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_destination: Mutex<HashMap<DestinationKey, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledDelivery {
    pub fn new(inner: Arc<dyn DeliveryPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_destination: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, key: DestinationKey) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_destination.lock().await;
        map.entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_destination_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, key: DestinationKey) {
        let global_wait = { self.global.lock().await.reserve() };
        let dest_wait = {
            let lim = self.limiter_for(key).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(dest_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl DeliveryPort for ThrottledDelivery {
    fn platform(&self) -> Platform {
        self.inner.platform()
    }

    async fn send_to(
        &self,
        destination: &Destination,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<(), DeliveryError> {
        self.throttle(destination.key()).await;
        self.inner.send_to(destination, text, image_url).await
    }
}
