//! Entity Cache - read-through cache-aside access layer.
//!
//! Serves entity records by id from a volatile cache, falling back to an
//! authoritative store on a miss and writing results back. Concurrent misses
//! for one id share a single store read, and soft-expired entries are served
//! (tagged stale) while the store is unreachable.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `database` - Store contract, MongoDB and in-memory backends, entity models
//! - `cache` - Dual-TTL cache contract with Moka and Redis implementations
//! - `flight` - Per-key single-flight deduplication
//! - `service` - Read-through service, administration and health monitoring
//! - `error` - Error taxonomy

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod flight;
pub mod service;

pub use cache::{
    Cache, CacheBackend, CacheConfig, CacheEntry, CacheStats, Freshness, MemoryCache, RedisCache,
    RedisOptions,
};
pub use config::{Config, ConfigError};
pub use database::{
    EntityId, EntityRecord, EntityRow, InMemoryStore, IntoEntityId, MongoStore, Origin, Store,
    StoreOptions,
};
pub use error::{CacheError, Error, Result, StoreError};
pub use service::{
    CacheDiagnostics, DEFAULT_CLEAR_PATTERN, HealthMonitor, HealthReport, ProbeStatus,
    ReadThroughService, ServiceConfig,
};
