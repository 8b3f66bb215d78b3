//! Configuration module.
//!
//! Loads configuration from environment variables (and `.env`).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CacheConfig, RedisOptions};
use crate::database::StoreOptions;
use crate::service::ServiceConfig;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Application configuration.
///
/// Treated as immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub mongodb_collection: String,
    pub store_pool_size: u32,
    pub store_connect_timeout: Duration,
    pub store_idle_timeout: Duration,

    // Cache
    pub cache: CacheConfig,
    /// Redis endpoint. The in-process cache is used when unset.
    pub redis_url: Option<String>,
    pub redis_timeout: Duration,

    /// Default deadline applied to read-path calls. `None` means unbounded.
    pub request_timeout: Option<Duration>,

    /// Period of the background health monitor.
    pub health_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns error if a required variable is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let cache = CacheConfig::with_capacity(vars.parse("CACHE_MAX_CAPACITY", 10_000)?)
            .soft_ttl(Duration::from_secs(vars.parse("CACHE_SOFT_TTL_SECS", 300)?))
            .hard_ttl(Duration::from_secs(vars.parse("CACHE_HARD_TTL_SECS", 900)?));

        if !cache.is_valid() {
            return Err(ConfigError::InvalidValue {
                field: "CACHE_SOFT_TTL_SECS".to_string(),
                value: cache.soft_ttl.as_secs().to_string(),
                reason: format!(
                    "must not exceed CACHE_HARD_TTL_SECS ({})",
                    cache.hard_ttl.as_secs()
                ),
            });
        }

        let store_pool_size: u32 = vars.parse("STORE_POOL_SIZE", 20)?;
        if store_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "STORE_POOL_SIZE".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let request_timeout = vars
            .optional::<u64>("REQUEST_TIMEOUT_MS")?
            .map(Duration::from_millis);

        Ok(Self {
            mongodb_uri: vars.required("MONGODB_URI")?,
            mongodb_database: vars.string("MONGODB_DATABASE", "entities"),
            mongodb_collection: vars.string("MONGODB_COLLECTION", "entities"),
            store_pool_size,
            store_connect_timeout: Duration::from_millis(vars.parse("STORE_CONNECT_TIMEOUT_MS", 2_000)?),
            store_idle_timeout: Duration::from_millis(vars.parse("STORE_IDLE_TIMEOUT_MS", 30_000)?),
            cache,
            redis_url: vars.get("REDIS_URL"),
            redis_timeout: Duration::from_millis(vars.parse("REDIS_TIMEOUT_MS", 1_000)?),
            request_timeout,
            health_interval: Duration::from_secs(vars.parse("HEALTH_INTERVAL_SECS", 30)?),
        })
    }

    /// Connection settings for the MongoDB store.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            uri: self.mongodb_uri.clone(),
            database: self.mongodb_database.clone(),
            collection: self.mongodb_collection.clone(),
            max_pool_size: self.store_pool_size,
            connect_timeout: self.store_connect_timeout,
            idle_timeout: self.store_idle_timeout,
        }
    }

    /// Connection settings for the Redis cache, if one is configured.
    pub fn redis_options(&self) -> Option<RedisOptions> {
        self.redis_url.as_ref().map(|url| RedisOptions {
            url: url.clone(),
            timeout: self.redis_timeout,
        })
    }

    /// Read-path settings for the service.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            soft_ttl: self.cache.soft_ttl,
            hard_ttl: self.cache.hard_ttl,
            request_timeout: self.request_timeout,
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::MissingRequired {
            field: name.to_string(),
        })
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn optional<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    field: name.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(name)?.unwrap_or(default))
    }
}
