//! Administrative operations: cache statistics, bulk invalidation and health.

use serde::Serialize;
use tracing::{info, warn};

use super::health::{HealthMonitor, HealthReport};
use super::read_through::ReadThroughService;
use crate::cache::{Cache, CacheStats};
use crate::database::{CACHE_KEY_PREFIX, Store};
use crate::error::{Error, Result};

/// Pattern matching every entity key written by the read path.
pub const DEFAULT_CLEAR_PATTERN: &str = "entity:*";

/// Cache statistics, or the reason they could not be collected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CacheDiagnostics {
    Stats(CacheStats),
    Unavailable { error: String },
}

impl<S: Store, C: Cache> ReadThroughService<S, C> {
    /// Collect cache statistics. Never fails.
    pub async fn cache_stats(&self) -> CacheDiagnostics {
        match self.cache.stats().await {
            Ok(stats) => CacheDiagnostics::Stats(stats),
            Err(e) => {
                warn!("Failed to collect cache stats: {}", e);
                CacheDiagnostics::Unavailable {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Delete every cache key matching `pattern`, returning the count.
    ///
    /// Subsequent reads of deleted ids go to the store.
    pub async fn clear_cache(&self, pattern: &str) -> Result<u64> {
        if pattern.trim().is_empty() {
            return Err(Error::invalid("clear pattern must not be empty"));
        }
        if !pattern.starts_with(CACHE_KEY_PREFIX) && pattern != "*" {
            warn!("Clear pattern {:?} does not target entity keys", pattern);
        }

        match self.cache.delete_matching(pattern).await {
            Ok(deleted) => {
                info!("Cleared {} cache entries matching {:?}", deleted, pattern);
                Ok(deleted)
            }
            Err(e) => {
                warn!("Failed to clear cache entries matching {:?}: {}", pattern, e);
                Err(Error::CacheOperationFailed(e.to_string()))
            }
        }
    }

    /// Probe the store and the cache.
    pub async fn health_check(&self) -> HealthReport {
        self.health.check().await
    }

    /// Monitor over this service's backends, for periodic probing.
    pub fn health_monitor(&self) -> &HealthMonitor<S, C> {
        &self.health
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::{CacheConfig, MemoryCache};
    use crate::database::{InMemoryStore, Origin};
    use crate::service::ServiceConfig;
    use crate::service::test_support::{FailingCache, prime, row};

    fn setup(ids: &[i64]) -> (Arc<InMemoryStore>, Arc<MemoryCache>, ReadThroughService<InMemoryStore, MemoryCache>) {
        let store = Arc::new(InMemoryStore::with_rows(ids.iter().map(|&i| row(i))));
        let cache = Arc::new(MemoryCache::new("entities", &CacheConfig::default()));
        let service = ReadThroughService::new(Arc::clone(&store), Arc::clone(&cache), ServiceConfig::default());
        (store, cache, service)
    }

    fn failing() -> ReadThroughService<InMemoryStore, FailingCache> {
        ReadThroughService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FailingCache),
            ServiceConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_clear_default_pattern_then_reload() {
        let (store, cache, service) = setup(&[1, 2, 3, 4, 5]);
        for raw in 1..=5 {
            prime(&cache, &row(raw), Duration::ZERO);
        }

        assert_eq!(service.clear_cache(DEFAULT_CLEAR_PATTERN).await.unwrap(), 5);
        assert_eq!(cache.entry_count(), 0);

        let record = service.get_by_id(3).await.unwrap().unwrap();
        assert_eq!(record.origin, Origin::Store);
        assert_eq!(store.point_lookups(), 1);
    }

    #[tokio::test]
    async fn test_clear_narrow_pattern() {
        let (_, cache, service) = setup(&[]);
        for raw in [1, 10, 11, 2] {
            prime(&cache, &row(raw), Duration::ZERO);
        }

        assert_eq!(service.clear_cache("entity:1?").await.unwrap(), 2);
        assert_eq!(service.clear_cache("entity:1").await.unwrap(), 1);
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_nothing_matches() {
        let (_, _, service) = setup(&[]);
        assert_eq!(service.clear_cache(DEFAULT_CLEAR_PATTERN).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_rejects_empty_pattern() {
        let (_, _, service) = setup(&[]);
        assert!(matches!(service.clear_cache("").await, Err(Error::InvalidArgument(_))));
        assert!(matches!(service.clear_cache("  ").await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_clear_surfaces_cache_failure() {
        let err = failing().clear_cache(DEFAULT_CLEAR_PATTERN).await.unwrap_err();
        assert!(matches!(err, Error::CacheOperationFailed(_)));
    }

    #[tokio::test]
    async fn test_stats_reflect_reads() {
        let (_, cache, service) = setup(&[1]);
        prime(&cache, &row(2), Duration::ZERO);

        service.get_by_id(2).await.unwrap();
        service.get_by_id(1).await.unwrap();

        match service.cache_stats().await {
            CacheDiagnostics::Stats(stats) => {
                assert_eq!(stats.entry_count, 2);
                assert_eq!(stats.hits, 1);
                assert_eq!(stats.misses, 1);
                assert!(stats.payload_bytes > 0);
            }
            other => panic!("unexpected diagnostics: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stats_report_unavailable_cache() {
        let diagnostics = failing().cache_stats().await;
        assert!(matches!(diagnostics, CacheDiagnostics::Unavailable { ref error } if error.contains("cache unavailable")));

        let json = serde_json::to_value(&diagnostics).unwrap();
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_health_check_delegates_to_monitor() {
        let (store, _, service) = setup(&[]);
        assert!(service.health_check().await.is_healthy());

        store.set_unavailable(true);
        let report = service.health_check().await;
        assert!(!report.store.is_healthy());
        assert!(report.cache.is_healthy());
    }
}
