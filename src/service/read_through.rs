//! Read-through access to entity records.
//!
//! Reads prefer the cache, fall through to the store on a miss or a
//! soft-expired entry, and write successful store reads back into the cache.
//! A soft-expired entry is only served (tagged stale) when the store is
//! unreachable.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, warn};

use super::health::HealthMonitor;
use crate::cache::{Cache, Freshness};
use crate::database::{EntityId, EntityRecord, EntityRow, IntoEntityId, Store};
use crate::error::{Error, Result, StoreError};
use crate::flight::SingleFlight;

/// Outcome of a single store read, shared between single-flight waiters.
type Fetch = Result<Option<EntityRecord>, StoreError>;

/// Outcome of a batched store read, projected per id onto [`Fetch`].
type BatchFetch = Result<Arc<HashMap<EntityId, EntityRecord>>, StoreError>;

/// Read-path settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Freshness deadline for entries written through to the cache.
    pub soft_ttl: Duration,
    /// Eviction deadline for entries written through to the cache.
    pub hard_ttl: Duration,
    /// Deadline applied by [`ReadThroughService::get_by_id`] and
    /// [`ReadThroughService::get_many`]. `None` means unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            soft_ttl: Duration::from_secs(300), // 5 minutes
            hard_ttl: Duration::from_secs(900), // 15 minutes
            request_timeout: None,
        }
    }
}

/// Cache-aside access layer over a [`Store`] and a [`Cache`].
///
/// # Example
///
/// ```rust,ignore
/// let service = ReadThroughService::new(store, cache, ServiceConfig::default());
///
/// let one = service.get_by_id(42).await?;
/// let many = service.get_many([1, 2, 3]).await?;
/// ```
pub struct ReadThroughService<S: Store, C: Cache> {
    pub(super) store: Arc<S>,
    pub(super) cache: Arc<C>,
    pub(super) health: HealthMonitor<S, C>,
    flights: SingleFlight<EntityId, Fetch>,
    config: ServiceConfig,
}

impl<S: Store, C: Cache> ReadThroughService<S, C> {
    /// Create a new service over shared backends.
    pub fn new(store: Arc<S>, cache: Arc<C>, mut config: ServiceConfig) -> Self {
        if config.soft_ttl > config.hard_ttl {
            warn!(
                "Soft TTL {:?} exceeds hard TTL {:?}, clamping",
                config.soft_ttl, config.hard_ttl
            );
            config.soft_ttl = config.hard_ttl;
        }

        Self {
            health: HealthMonitor::new(Arc::clone(&store), Arc::clone(&cache)),
            store,
            cache,
            flights: SingleFlight::new(),
            config,
        }
    }

    /// Get the service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get a reference to the cache.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Get one record, bounded by the configured request timeout.
    ///
    /// Returns `Ok(None)` when the store authoritatively holds no such id.
    pub async fn get_by_id(&self, id: impl IntoEntityId) -> Result<Option<EntityRecord>> {
        let id = id.into_entity_id()?;
        match self.config.request_timeout {
            Some(deadline) => within(deadline, self.resolve_one(id)).await,
            None => self.resolve_one(id).await,
        }
    }

    /// Get one record, failing with [`Error::Timeout`] after `deadline`.
    ///
    /// A timed-out caller does not cancel the store read shared with other
    /// callers; it still completes and populates the cache.
    pub async fn get_by_id_within(
        &self,
        id: impl IntoEntityId,
        deadline: Duration,
    ) -> Result<Option<EntityRecord>> {
        let id = id.into_entity_id()?;
        within(deadline, self.resolve_one(id)).await
    }

    /// Get many records in input order, bounded by the configured request timeout.
    ///
    /// Ids with no resolvable record are dropped; duplicate ids repeat the
    /// same record at each position.
    pub async fn get_many<I>(&self, ids: I) -> Result<Vec<EntityRecord>>
    where
        I: IntoIterator,
        I::Item: IntoEntityId,
    {
        let ids = validate_ids(ids)?;
        match self.config.request_timeout {
            Some(deadline) => within(deadline, self.resolve_many(&ids)).await,
            None => self.resolve_many(&ids).await,
        }
    }

    /// Get many records, failing with [`Error::Timeout`] after `deadline`.
    pub async fn get_many_within<I>(&self, ids: I, deadline: Duration) -> Result<Vec<EntityRecord>>
    where
        I: IntoIterator,
        I::Item: IntoEntityId,
    {
        let ids = validate_ids(ids)?;
        within(deadline, self.resolve_many(&ids)).await
    }

    async fn resolve_one(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        let fallback = match self.cached_row(id).await {
            Some((row, Freshness::Fresh)) => {
                debug!("Cache hit for entity {}", id);
                return Ok(Some(EntityRecord::from_cache(row)));
            }
            Some((row, _)) => Some(row),
            None => None,
        };

        match self.fetch_one(id).await {
            Ok(record) => Ok(record),
            Err(StoreError::Unavailable(reason)) => match fallback {
                Some(row) => {
                    warn!("Store unavailable ({}), serving stale entity {}", reason, id);
                    Ok(Some(EntityRecord::stale_from_cache(row)))
                }
                None => Err(Error::StoreUnavailable(reason)),
            },
        }
    }

    /// Store read for one id, deduplicated across concurrent callers.
    /// The write-through happens inside the shared execution.
    async fn fetch_one(&self, id: EntityId) -> Fetch {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let (soft_ttl, hard_ttl) = (self.config.soft_ttl, self.config.hard_ttl);

        self.flights
            .work(id, move || async move {
                let started = Instant::now();
                let row = store.find_by_id(id).await?;
                let latency = started.elapsed();

                match row {
                    Some(row) => {
                        write_through(cache.as_ref(), &row, soft_ttl, hard_ttl).await;
                        Ok(Some(EntityRecord::from_store(row, latency)))
                    }
                    None => {
                        debug!("Entity {} not found in store", id);
                        Ok(None)
                    }
                }
            })
            .await
            .unwrap_or_else(|cancelled| Err(StoreError::Unavailable(cancelled.to_string())))
    }

    /// Store reads for many ids in at most one batch call.
    ///
    /// Ids already being fetched join those calls; the rest share one
    /// `find_by_ids` whose rows are written through before any waiter sees
    /// them. Outputs are returned in `ids` order.
    async fn fetch_many(&self, ids: &[EntityId]) -> Vec<Fetch> {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let (soft_ttl, hard_ttl) = (self.config.soft_ttl, self.config.hard_ttl);

        self.flights
            .work_many(
                ids,
                move |leaders| async move {
                    debug!("Batch fetching {} entities from store", leaders.len());
                    let started = Instant::now();
                    let rows = store.find_by_ids(&leaders).await?;
                    let latency = started.elapsed();

                    let mut records = HashMap::with_capacity(rows.len());
                    for row in rows {
                        write_through(cache.as_ref(), &row, soft_ttl, hard_ttl).await;
                        records.insert(row.id, EntityRecord::from_store(row, latency));
                    }
                    Ok::<_, StoreError>(Arc::new(records))
                },
                |batch: &BatchFetch, id: &EntityId| match batch {
                    Ok(records) => Ok(records.get(id).cloned()),
                    Err(e) => Err(e.clone()),
                },
            )
            .await
            .into_iter()
            .map(|output| {
                output.unwrap_or_else(|cancelled| Err(StoreError::Unavailable(cancelled.to_string())))
            })
            .collect()
    }

    async fn resolve_many(&self, ids: &[EntityId]) -> Result<Vec<EntityRecord>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let distinct: Vec<EntityId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let lookups = join_all(distinct.iter().map(|&id| self.cached_row(id))).await;

        let mut resolved: HashMap<EntityId, EntityRecord> = HashMap::with_capacity(distinct.len());
        let mut fallbacks: HashMap<EntityId, EntityRow> = HashMap::new();
        let mut misses: Vec<EntityId> = Vec::new();

        for (&id, lookup) in distinct.iter().zip(lookups) {
            match lookup {
                Some((row, Freshness::Fresh)) => {
                    resolved.insert(id, EntityRecord::from_cache(row));
                }
                Some((row, _)) => {
                    fallbacks.insert(id, row);
                    misses.push(id);
                }
                None => misses.push(id),
            }
        }

        if !misses.is_empty() {
            debug!(
                "Resolving {} of {} entities from store",
                misses.len(),
                distinct.len()
            );

            let mut unavailable = None;
            for (id, fetch) in misses.iter().zip(self.fetch_many(&misses).await) {
                match fetch {
                    Ok(Some(record)) => {
                        resolved.insert(*id, record);
                    }
                    Ok(None) => {}
                    Err(StoreError::Unavailable(reason)) => {
                        if let Some(row) = fallbacks.remove(id) {
                            resolved.insert(*id, EntityRecord::stale_from_cache(row));
                        }
                        unavailable.get_or_insert(reason);
                    }
                }
            }

            if let Some(reason) = unavailable {
                warn!(
                    "Store unavailable for batch of {} ({}), falling back to stale entries",
                    misses.len(),
                    reason
                );
            }
        }

        Ok(ids.iter().filter_map(|id| resolved.get(id).cloned()).collect())
    }

    /// Decoded cache entry for `id`, or `None` on miss.
    ///
    /// Cache failures and undecodable payloads count as misses.
    async fn cached_row(&self, id: EntityId) -> Option<(EntityRow, Freshness)> {
        let key = id.cache_key();
        let entry = match self.cache.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed for {}, treating as miss: {}", key, e);
                return None;
            }
        };

        let freshness = entry.freshness();
        if freshness == Freshness::Expired {
            return None;
        }

        match serde_json::from_str::<EntityRow>(entry.payload()) {
            Ok(row) => Some((row, freshness)),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }
}

impl<S: Store, C: Cache> std::fmt::Debug for ReadThroughService<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughService")
            .field("config", &self.config)
            .field("flights", &self.flights)
            .finish()
    }
}

fn validate_ids<I>(ids: I) -> Result<Vec<EntityId>>
where
    I: IntoIterator,
    I::Item: IntoEntityId,
{
    let ids = ids
        .into_iter()
        .map(IntoEntityId::into_entity_id)
        .collect::<Result<Vec<_>>>()?;

    if ids.is_empty() {
        return Err(Error::invalid("entity id list must not be empty"));
    }
    Ok(ids)
}

async fn within<T>(deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Request exceeded deadline of {:?}", deadline);
            Err(Error::Timeout(deadline))
        }
    }
}

/// Best-effort cache population; failures are logged and swallowed.
async fn write_through<C: Cache>(cache: &C, row: &EntityRow, soft_ttl: Duration, hard_ttl: Duration) {
    let key = row.id.cache_key();
    let payload = match serde_json::to_string(row) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize entity {}: {}", row.id, e);
            return;
        }
    };

    match cache.set_with_ttl(&key, payload, soft_ttl, hard_ttl).await {
        Ok(()) => debug!("Cached {} (soft {:?}, hard {:?})", key, soft_ttl, hard_ttl),
        Err(e) => warn!("Cache write failed for {}: {}", key, e),
    }
}
