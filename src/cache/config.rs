//! Cache configuration.

use std::time::Duration;

/// Configuration for a cache instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,

    /// Freshness deadline for new entries.
    pub soft_ttl: Duration,

    /// Eviction deadline for new entries.
    /// Between `soft_ttl` and `hard_ttl` an entry is only served as a
    /// fallback while the store is failing.
    pub hard_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            soft_ttl: Duration::from_secs(300), // 5 minutes
            hard_ttl: Duration::from_secs(900), // 15 minutes
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set max capacity for cache (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Set the freshness deadline.
    #[must_use]
    pub fn soft_ttl(mut self, duration: Duration) -> Self {
        self.soft_ttl = duration;
        self
    }

    /// Set the eviction deadline.
    #[must_use]
    pub fn hard_ttl(mut self, duration: Duration) -> Self {
        self.hard_ttl = duration;
        self
    }

    /// Single-TTL behaviour: no stale-servable window.
    #[must_use]
    pub fn single_ttl(mut self, duration: Duration) -> Self {
        self.soft_ttl = duration;
        self.hard_ttl = duration;
        self
    }

    /// Whether `soft_ttl <= hard_ttl` holds.
    pub fn is_valid(&self) -> bool {
        self.soft_ttl <= self.hard_ttl
    }
}
