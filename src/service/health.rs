//! Backend health probing.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::database::Store;

/// Upper bound on a single backend probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Unhealthy { reason: String },
}

impl ProbeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Point-in-time health of both backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub store: ProbeStatus,
    pub cache: ProbeStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Both backends answered.
    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy() && self.cache.is_healthy()
    }
}

/// Probes a store and a cache concurrently.
pub struct HealthMonitor<S: Store, C: Cache> {
    store: Arc<S>,
    cache: Arc<C>,
    probe_timeout: Duration,
}

impl<S: Store, C: Cache> Clone for HealthMonitor<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            probe_timeout: self.probe_timeout,
        }
    }
}

impl<S: Store, C: Cache> HealthMonitor<S, C> {
    pub fn new(store: Arc<S>, cache: Arc<C>) -> Self {
        Self {
            store,
            cache,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the per-probe timeout.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Probe both backends. Never fails; failures are reported per backend.
    pub async fn check(&self) -> HealthReport {
        let (store, cache) = tokio::join!(
            probe(self.probe_timeout, self.store.ping()),
            probe(self.probe_timeout, self.cache.ping()),
        );

        HealthReport {
            store,
            cache,
            timestamp: Utc::now(),
        }
    }

    /// Probe every `interval` on a background task, logging transitions.
    pub fn spawn(&self, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut was_healthy: Option<bool> = None;

            loop {
                ticker.tick().await;
                let report = monitor.check().await;
                let healthy = report.is_healthy();

                if was_healthy == Some(healthy) {
                    debug!("Health check: store={:?} cache={:?}", report.store, report.cache);
                } else if healthy {
                    info!("Backends healthy");
                } else {
                    warn!(
                        "Backends unhealthy: store={:?} cache={:?}",
                        report.store, report.cache
                    );
                }
                was_healthy = Some(healthy);
            }
        })
    }
}

async fn probe<E: Display>(
    limit: Duration,
    ping: impl Future<Output = Result<(), E>>,
) -> ProbeStatus {
    match tokio::time::timeout(limit, ping).await {
        Ok(Ok(())) => ProbeStatus::Healthy,
        Ok(Err(e)) => ProbeStatus::Unhealthy {
            reason: e.to_string(),
        },
        Err(_) => ProbeStatus::Unhealthy {
            reason: format!("probe timed out after {limit:?}"),
        },
    }
}
