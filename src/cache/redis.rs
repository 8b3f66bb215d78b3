//! Networked cache backed by Redis.
//!
//! Each value is stored as a JSON envelope carrying the payload, its
//! insertion time and both TTLs. The hard TTL is also set as the key's
//! expiry so the server evicts it on time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::Counters;
use super::{Cache, CacheEntry, CacheStats, Freshness};
use crate::error::CacheError;

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Keys removed per `DEL` command.
const DELETE_CHUNK: usize = 500;

/// Connection settings for [`RedisCache`].
#[derive(Debug, Clone)]
pub struct RedisOptions {
    /// Redis connection URL, e.g. `redis://localhost:6379/0`.
    pub url: String,
    /// Bound on connecting and on every command.
    pub timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: String,
    inserted_at: DateTime<Utc>,
    soft_ttl_ms: u64,
    hard_ttl_ms: u64,
}

impl Envelope {
    fn wrap(entry: &CacheEntry) -> Self {
        Self {
            payload: entry.payload().to_string(),
            inserted_at: entry.inserted_time(),
            soft_ttl_ms: millis(entry.soft_ttl()),
            hard_ttl_ms: millis(entry.hard_ttl()),
        }
    }

    fn into_entry(self) -> CacheEntry {
        CacheEntry::inserted_at(
            self.payload,
            self.inserted_at,
            Duration::from_millis(self.soft_ttl_ms),
            Duration::from_millis(self.hard_ttl_ms),
        )
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn unavailable(err: RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

/// Read a numeric field from `INFO` output.
fn info_field(info: &str, field: &str) -> Option<u64> {
    info.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(name, _)| *name == field)
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Redis-backed cache.
///
/// The connection manager reconnects on its own after an outage; while the
/// server is unreachable every operation fails with
/// [`CacheError::Unavailable`].
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl RedisCache {
    /// Connect to the server at `options.url`.
    ///
    /// # Errors
    /// Fails if the URL is malformed or no connection is made within
    /// `options.timeout`.
    pub async fn connect(options: &RedisOptions) -> Result<Self, CacheError> {
        let client = Client::open(options.url.as_str()).map_err(unavailable)?;

        let conn = tokio::time::timeout(options.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Unavailable(format!(
                    "connecting to Redis timed out after {:?}",
                    options.timeout
                ))
            })?
            .map_err(unavailable)?;

        info!("Connected to Redis");

        Ok(Self {
            conn,
            timeout: options.timeout,
            counters: Arc::default(),
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, CacheError> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => result.map_err(unavailable),
            Err(_) => Err(CacheError::Unavailable(format!(
                "Redis command timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let raw: Option<String> = self.query(redis::cmd("GET").arg(key)).await?;

        let entry = raw
            .and_then(|raw| match serde_json::from_str::<Envelope>(&raw) {
                Ok(envelope) => Some(envelope.into_entry()),
                Err(e) => {
                    warn!("Discarding undecodable Redis entry {}: {}", key, e);
                    None
                }
            })
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
        let entry = CacheEntry::new(payload, soft_ttl, hard_ttl);
        let value = serde_json::to_string(&Envelope::wrap(&entry))
            .map_err(|e| CacheError::Unavailable(format!("encoding entry {key}: {e}")))?;

        // PX rejects zero.
        let expiry = millis(entry.hard_ttl()).max(1);
        let _: () = self
            .query(redis::cmd("SET").arg(key).arg(value).arg("PX").arg(expiry))
            .await?;
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        // SCAN may report a key more than once.
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;
            keys.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut removed = 0;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let mut cmd = redis::cmd("DEL");
            for key in chunk {
                cmd.arg(key);
            }
            let count: u64 = self.query(&cmd).await?;
            removed += count;
        }
        debug!("Deleted {} of {} keys from Redis", removed, keys.len());
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        debug!("Redis ping: {}", reply);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entry_count: u64 = self.query(&redis::cmd("DBSIZE")).await?;
        let info: String = self.query(redis::cmd("INFO").arg("memory")).await?;
        let used_memory = info_field(&info, "used_memory").unwrap_or_default();

        Ok(self.counters.stats(entry_count, used_memory))
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("timeout", &self.timeout)
            .finish()
    }
}
