//! Per-host politeness gate.
//!
//! Every request to a source host first takes a permit from that host's
//! semaphore, then waits out the host's minimum interval since the previous
//! request. Concurrent scans of different records therefore never hammer
//! the same site.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::error::PluginError;

fn default_permits() -> usize {
    2
}

/// Limits applied to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HostLimits {
    /// Maximum in-flight requests.
    #[serde(default = "default_permits")]
    pub permits: usize,
    /// Minimum delay between the starts of two requests.
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            permits: default_permits(),
            min_interval_ms: 0,
        }
    }
}

struct HostSlot {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HostSlot {
    fn new(limits: HostLimits) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limits.permits.max(1))),
            min_interval: Duration::from_millis(limits.min_interval_ms),
            last_request: Mutex::new(None),
        }
    }

    async fn wait_interval(&self, host: &str) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!(host, ?wait_time, "rate limiting");
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

/// Throttles requests per host name.
pub struct HostGate {
    defaults: HostLimits,
    overrides: HashMap<String, HostLimits>,
    hosts: StdMutex<HashMap<String, Arc<HostSlot>>>,
}

impl HostGate {
    pub fn new(defaults: HostLimits) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            hosts: StdMutex::new(HashMap::new()),
        }
    }

    /// Use `limits` for `host` instead of the defaults.
    #[must_use]
    pub fn with_host(mut self, host: &str, limits: HostLimits) -> Self {
        self.overrides.insert(host.to_ascii_lowercase(), limits);
        self
    }

    pub fn limits_for(&self, host: &str) -> HostLimits {
        self.overrides
            .get(&host.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.defaults)
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        let host = host.to_ascii_lowercase();
        let mut hosts = self
            .hosts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostSlot::new(self.limits_for(&host))))
            .clone()
    }

    /// Wait for a permit and the host's minimum interval.
    pub async fn acquire(&self, host: &str) -> Result<GatePermit, PluginError> {
        let slot = self.slot(host);
        let permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PluginError::GateClosed(host.to_string()))?;
        slot.wait_interval(host).await;
        Ok(GatePermit { _permit: permit })
    }

    /// Permits currently free for `host` (for diagnostics and tests).
    pub fn available(&self, host: &str) -> usize {
        self.slot(host).permits.available_permits()
    }
}

impl Default for HostGate {
    fn default() -> Self {
        Self::new(HostLimits::default())
    }
}

impl std::fmt::Debug for HostGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostGate")
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
