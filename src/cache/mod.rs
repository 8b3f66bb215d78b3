//! Cache module - volatile keyed store with dual-TTL entries.
//!
//! Entries are written with a soft TTL (freshness deadline) and a hard TTL
//! (eviction deadline). A lookup returns the entry together with its
//! insertion time, and callers classify it with [`CacheEntry::freshness`].
//!
//! ## Architecture
//!
//! - [`Cache`] - backend contract (get / set / enumerate / delete / ping / stats)
//! - [`MemoryCache`] - in-process implementation on Moka
//! - [`RedisCache`] - networked implementation on Redis
//! - [`CacheBackend`] - one of the two, chosen from configuration
//! - [`pattern`] - Redis-style glob matching for administrative enumeration
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = MemoryCache::new("entities", &CacheConfig::default());
//! cache.set_with_ttl("entity:1", payload, soft, hard).await?;
//! if let Some(entry) = cache.get("entity:1").await? {
//!     match entry.freshness() { /* ... */ }
//! }
//! ```

mod backend;
mod config;
mod entry;
mod memory;
pub mod pattern;
mod redis;

use std::future::Future;
use std::time::Duration;

pub use backend::CacheBackend;
pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheStats, Freshness};
pub use memory::MemoryCache;
pub use self::redis::{RedisCache, RedisOptions};

use crate::error::CacheError;

/// Volatile string-keyed cache of serialized values.
///
/// Every operation may fail with [`CacheError::Unavailable`]. The read path
/// treats such failures as misses; administrative callers surface them.
pub trait Cache: Send + Sync + 'static {
    /// Look up a live entry. Entries past their hard TTL are never returned.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Store `payload` under `key`, replacing any previous entry.
    fn set_with_ttl(
        &self,
        key: &str,
        payload: String,
        soft_ttl: Duration,
        hard_ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Enumerate live keys matching a glob pattern.
    fn keys_matching(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Delete the given keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<u64, CacheError>> + Send;

    /// Delete every key matching a glob pattern, returning the count.
    fn delete_matching(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<u64, CacheError>> + Send {
        async move {
            let keys = self.keys_matching(pattern).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            self.delete(&keys).await
        }
    }

    /// Liveness probe.
    fn ping(&self) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Usage statistics.
    fn stats(&self) -> impl Future<Output = Result<CacheStats, CacheError>> + Send;
}
