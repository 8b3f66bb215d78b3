//! Cache entries, freshness classification and statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Freshness of a cache entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the soft TTL. Always preferred.
    Fresh,
    /// Past the soft TTL but before the hard TTL. Servable only as a
    /// fallback while the store is failing.
    SoftExpired,
    /// Past the hard TTL. Equivalent to a miss.
    Expired,
}

/// A serialized value with its dual-TTL window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    payload: String,
    inserted_at: DateTime<Utc>,
    soft_ttl: Duration,
    hard_ttl: Duration,
}

impl CacheEntry {
    /// Create an entry inserted now. `soft_ttl` is clamped to `hard_ttl`.
    pub fn new(payload: String, soft_ttl: Duration, hard_ttl: Duration) -> Self {
        Self::inserted_at(payload, Utc::now(), soft_ttl, hard_ttl)
    }

    /// Create an entry with an explicit insertion time.
    pub fn inserted_at(
        payload: String,
        inserted_at: DateTime<Utc>,
        soft_ttl: Duration,
        hard_ttl: Duration,
    ) -> Self {
        Self {
            payload,
            inserted_at,
            soft_ttl: soft_ttl.min(hard_ttl),
            hard_ttl,
        }
    }

    /// Serialized value.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// When the entry was written.
    pub fn inserted_time(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    /// Freshness deadline, relative to insertion.
    pub fn soft_ttl(&self) -> Duration {
        self.soft_ttl
    }

    /// Eviction deadline, relative to insertion.
    pub fn hard_ttl(&self) -> Duration {
        self.hard_ttl
    }

    /// Age of the entry at `now`. Clock skew into the past counts as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.inserted_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Time left before hard expiry at `now`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.hard_ttl.saturating_sub(self.age_at(now))
    }

    /// Classify the entry at `now`.
    pub fn freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        let age = self.age_at(now);
        if age < self.soft_ttl {
            Freshness::Fresh
        } else if age < self.hard_ttl {
            Freshness::SoftExpired
        } else {
            Freshness::Expired
        }
    }

    /// Classify the entry now.
    pub fn freshness(&self) -> Freshness {
        self.freshness_at(Utc::now())
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Lookups that found a live entry (fresh or soft-expired).
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Hits that found a soft-expired entry.
    pub stale_hits: u64,
    /// Bytes held by the backend: live payload bytes in process, or the
    /// server's `used_memory` for Redis.
    pub payload_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lookup counters kept by each cache backend.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
}

impl Counters {
    /// Count one lookup and its outcome.
    pub(crate) fn record(&self, entry: Option<&CacheEntry>) {
        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if entry.freshness() == Freshness::SoftExpired {
                    self.stale_hits.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn stats(&self, entry_count: u64, payload_bytes: u64) -> CacheStats {
        CacheStats {
            entry_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            payload_bytes,
        }
    }
}
