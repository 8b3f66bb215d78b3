//! In-process store used by tests and local demos.
//!
//! Failures are injected per instance with [`InMemoryStore::set_unavailable`],
//! so a failing store is something a test constructs rather than a global
//! switch it toggles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::models::{EntityId, EntityRow};
use super::Store;
use crate::error::StoreError;

/// Store backed by a `HashMap`, with call accounting.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: RwLock<HashMap<EntityId, EntityRow>>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    point_lookups: AtomicUsize,
    batch_lookups: AtomicUsize,
    batches: Mutex<Vec<Vec<EntityId>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given rows.
    pub fn with_rows(rows: impl IntoIterator<Item = EntityRow>) -> Self {
        let store = Self::new();
        for row in rows {
            store.insert(row);
        }
        store
    }

    /// Insert or replace a row.
    pub fn insert(&self, row: EntityRow) {
        self.rows.write().insert(row.id, row);
    }

    /// Remove a row.
    pub fn remove(&self, id: EntityId) -> Option<EntityRow> {
        self.rows.write().remove(&id)
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of `find_by_id` calls so far.
    pub fn point_lookups(&self) -> usize {
        self.point_lookups.load(Ordering::SeqCst)
    }

    /// Number of `find_by_ids` calls so far.
    pub fn batch_lookups(&self) -> usize {
        self.batch_lookups.load(Ordering::SeqCst)
    }

    /// Id sets passed to each `find_by_ids` call, in call order.
    pub fn batches(&self) -> Vec<Vec<EntityId>> {
        self.batches.lock().clone()
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Store for InMemoryStore {
    async fn find_by_id(&self, id: EntityId) -> Result<Option<EntityRow>, StoreError> {
        self.point_lookups.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        let row = self.rows.read().get(&id).cloned();
        debug!("Memory store get {}: {:?}", id, row.is_some());
        Ok(row)
    }

    async fn find_by_ids(&self, ids: &[EntityId]) -> Result<Vec<EntityRow>, StoreError> {
        self.batch_lookups.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(ids.to_vec());
        self.round_trip().await?;
        let rows = self.rows.read();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.round_trip().await
    }
}
