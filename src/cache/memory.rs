//! In-process cache backed by Moka.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use moka::Expiry;
use moka::sync::Cache as MokaCache;
use tracing::debug;

use super::entry::Counters;
use super::{pattern, Cache, CacheConfig, CacheEntry, CacheStats, Freshness};
use crate::error::CacheError;

/// Evicts each entry at its own hard deadline.
struct HardDeadline;

impl Expiry<String, CacheEntry> for HardDeadline {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining_at(Utc::now()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_at(Utc::now()))
    }
}

/// Dual-TTL cache wrapper around Moka.
///
/// This cache is:
/// - Thread-safe and clone-friendly (clones share the same entries)
/// - Bounded by `max_capacity`, evicting with Moka's TinyLFU policy
/// - Evicting every entry at its hard TTL
pub struct MemoryCache {
    inner: MokaCache<String, CacheEntry>,
    counters: Arc<Counters>,
    name: Arc<str>,
}

impl Clone for MemoryCache {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            counters: Arc::clone(&self.counters),
            name: Arc::clone(&self.name),
        }
    }
}

impl MemoryCache {
    /// Create a new cache with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: &CacheConfig) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(HardDeadline)
            .build();

        let name = name.into();
        debug!("Creating cache: {}", name);

        Self {
            inner,
            counters: Arc::default(),
            name,
        }
    }

    /// Get the name of this cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a prebuilt entry, keeping its original insertion time.
    pub fn insert_entry(&self, key: impl Into<String>, entry: CacheEntry) {
        self.inner.insert(key.into(), entry);
    }

    /// Get the number of entries in the cache.
    ///
    /// Note: Pending maintenance is flushed first, but concurrent writers
    /// can still make this approximate.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self
            .inner
            .get(key)
            .filter(|entry| entry.freshness() != Freshness::Expired);

        self.counters.record(entry.as_ref());
        Ok(entry)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        payload: String,
        soft_ttl: Duration,
        hard_ttl: Duration,
    ) -> Result<(), CacheError> {
        self.inner
            .insert(key.to_string(), CacheEntry::new(payload, soft_ttl, hard_ttl));
        Ok(())
    }

    async fn keys_matching(&self, glob: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .inner
            .iter()
            .filter(|(key, _)| pattern::matches(glob, key))
            .map(|(key, _)| key.as_str().to_string())
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let removed = keys
            .iter()
            .filter(|key| self.inner.remove(key.as_str()).is_some())
            .count() as u64;
        debug!("Deleted {} of {} keys from cache {}", removed, keys.len(), self.name);
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let payload_bytes = self
            .inner
            .iter()
            .map(|(_, entry)| entry.payload().len() as u64)
            .sum();

        Ok(self.counters.stats(self.entry_count(), payload_bytes))
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.name)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MemoryCache {
        MemoryCache::new("test", &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache();
        cache
            .set_with_ttl("entity:1", "{\"a\":1}".into(), Duration::from_secs(5), Duration::from_secs(10))
            .await
            .unwrap();

        let entry = cache.get("entity:1").await.unwrap().unwrap();
        assert_eq!(entry.payload(), "{\"a\":1}");
        assert_eq!(entry.freshness(), Freshness::Fresh);
        assert!(cache.get("entity:2").await.unwrap().is_none());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.payload_bytes, 7);
    }

    #[tokio::test]
    async fn test_soft_expired_entry_is_returned_and_counted() {
        let cache = cache();
        cache.insert_entry(
            "entity:7",
            CacheEntry::inserted_at(
                "{}".into(),
                Utc::now() - chrono::Duration::seconds(400),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ),
        );

        let entry = cache.get("entity:7").await.unwrap().unwrap();
        assert_eq!(entry.freshness(), Freshness::SoftExpired);
        assert_eq!(cache.stats().await.unwrap().stale_hits, 1);
    }

    #[tokio::test]
    async fn test_hard_expired_entry_is_a_miss() {
        let cache = cache();
        cache.insert_entry(
            "entity:8",
            CacheEntry::inserted_at(
                "{}".into(),
                Utc::now() - chrono::Duration::seconds(1000),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ),
        );

        assert!(cache.get("entity:8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_evicted_at_hard_ttl() {
        let cache = cache();
        cache
            .set_with_ttl("entity:1", "{}".into(), Duration::from_millis(20), Duration::from_millis(300))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let entry = cache.get("entity:1").await.unwrap().unwrap();
        assert_eq!(entry.freshness(), Freshness::SoftExpired);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.get("entity:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let cache = cache();
        for id in 1..=5 {
            cache
                .set_with_ttl(&format!("entity:{id}"), "{}".into(), Duration::from_secs(5), Duration::from_secs(10))
                .await
                .unwrap();
        }
        cache
            .set_with_ttl("session:1", "{}".into(), Duration::from_secs(5), Duration::from_secs(10))
            .await
            .unwrap();

        let mut keys = cache.keys_matching("entity:*").await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 5);
        assert_eq!(keys[0], "entity:1");

        assert_eq!(cache.delete_matching("entity:*").await.unwrap(), 5);
        assert_eq!(cache.delete_matching("entity:*").await.unwrap(), 0);
        assert!(cache.get("session:1").await.unwrap().is_some());
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = cache();
        let other = cache.clone();
        cache
            .set_with_ttl("entity:1", "{}".into(), Duration::from_secs(5), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(other.get("entity:1").await.unwrap().is_some());
        assert_eq!(other.name(), "test");
        assert!(cache.ping().await.is_ok());
    }
}
