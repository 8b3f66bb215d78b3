//! Authoritative store backends.
//!
//! - [`Store`] - point and batched lookup contract
//! - [`MongoStore`] - MongoDB-backed implementation
//! - [`InMemoryStore`] - in-process fake with an injectable fault switch

mod memory;
mod models;
mod mongo;

use std::future::Future;

pub use memory::InMemoryStore;
pub use models::*;
pub use mongo::{MongoStore, StoreOptions};

use crate::error::StoreError;

/// Authoritative backend for entity rows.
///
/// Absence is authoritative: a reachable store answers `Ok(None)` (or leaves
/// the id out of a batch) for ids it does not hold. Only
/// [`StoreError::Unavailable`] signals that the answer is unknown.
pub trait Store: Send + Sync + 'static {
    /// Look up a single row.
    fn find_by_id(
        &self,
        id: EntityId,
    ) -> impl Future<Output = Result<Option<EntityRow>, StoreError>> + Send;

    /// Look up many rows in one round-trip. Row order is unspecified.
    fn find_by_ids(
        &self,
        ids: &[EntityId],
    ) -> impl Future<Output = Result<Vec<EntityRow>, StoreError>> + Send;

    /// Lightweight liveness probe.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
