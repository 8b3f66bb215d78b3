//! Cache backend chosen at startup.

use std::time::Duration;

use super::redis::{RedisCache, RedisOptions};
use super::{Cache, CacheConfig, CacheEntry, CacheStats, MemoryCache};
use crate::error::CacheError;

/// Either the in-process cache or Redis, selected by configuration.
#[derive(Debug, Clone)]
pub enum CacheBackend {
    Memory(MemoryCache),
    Redis(RedisCache),
}

impl CacheBackend {
    /// Connect to Redis when `redis` is given, otherwise build an
    /// in-process cache from `config`.
    pub async fn from_config(
        config: &CacheConfig,
        redis: Option<&RedisOptions>,
    ) -> Result<Self, CacheError> {
        match redis {
            Some(options) => Ok(Self::Redis(RedisCache::connect(options).await?)),
            None => Ok(Self::Memory(MemoryCache::new("entities", config))),
        }
    }

    /// Short backend name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl Cache for CacheBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        match self {
            Self::Memory(cache) => cache.get(key).await,
            Self::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        payload: String,
        soft_ttl: Duration,
        hard_ttl: Duration,
    ) -> Result<(), CacheError> {
        match self {
            Self::Memory(cache) => cache.set_with_ttl(key, payload, soft_ttl, hard_ttl).await,
            Self::Redis(cache) => cache.set_with_ttl(key, payload, soft_ttl, hard_ttl).await,
        }
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        match self {
            Self::Memory(cache) => cache.keys_matching(pattern).await,
            Self::Redis(cache) => cache.keys_matching(pattern).await,
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        match self {
            Self::Memory(cache) => cache.delete(keys).await,
            Self::Redis(cache) => cache.delete(keys).await,
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        match self {
            Self::Memory(cache) => cache.ping().await,
            Self::Redis(cache) => cache.ping().await,
        }
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        match self {
            Self::Memory(cache) => cache.stats().await,
            Self::Redis(cache) => cache.stats().await,
        }
    }
}
