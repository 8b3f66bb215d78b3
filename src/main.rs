//! `entity-cache [ID...]`
//!
//! With ids, resolves them through the read-through service and prints one
//! JSON line per record. Without ids, runs the health monitor until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use entity_cache::{Cache, CacheBackend, Config, MongoStore, ReadThroughService, Store};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

type Service = ReadThroughService<MongoStore, CacheBackend>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("entity_cache=info,mongodb=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("Starting entity cache...");

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    info!("Connecting to MongoDB...");
    let store = Arc::new(MongoStore::connect(&config.store_options()).await?);

    let cache = CacheBackend::from_config(&config.cache, config.redis_options().as_ref())
        .await
        .context("failed to initialize cache")?;
    info!(
        "Cache initialized ({}, soft TTL {:?}, hard TTL {:?})",
        cache.kind(),
        config.cache.soft_ttl,
        config.cache.hard_ttl
    );

    let service = ReadThroughService::new(Arc::clone(&store), Arc::new(cache), config.service_config());

    let ids: Vec<String> = std::env::args().skip(1).collect();
    let outcome = if ids.is_empty() {
        monitor(&service, config.health_interval).await
    } else {
        lookup(&service, &ids).await
    };

    store.shutdown().await;
    outcome
}

async fn monitor(service: &Service, interval: Duration) -> anyhow::Result<()> {
    let report = service.health_check().await;
    info!(
        "Initial health: store={:?} cache={:?}",
        report.store, report.cache
    );

    let handle = service.health_monitor().spawn(interval);
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    handle.abort();
    Ok(())
}

async fn lookup<S: Store, C: Cache>(
    service: &ReadThroughService<S, C>,
    ids: &[String],
) -> anyhow::Result<()> {
    if let [raw] = ids {
        match service
            .get_by_id(raw.as_str())
            .await
            .with_context(|| format!("failed to resolve entity {raw}"))?
        {
            Some(record) => println!("{}", serde_json::to_string(&record)?),
            None => warn!("Entity {} not found", raw),
        }
        return Ok(());
    }

    let records = service
        .get_many(ids.iter().map(String::as_str))
        .await
        .with_context(|| format!("failed to resolve entities {ids:?}"))?;

    if records.len() < ids.len() {
        warn!("Resolved {} of {} requested entities", records.len(), ids.len());
    }
    for record in records {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_cache::{CacheConfig, InMemoryStore, MemoryCache, ServiceConfig};

    fn service(store: &Arc<InMemoryStore>) -> ReadThroughService<InMemoryStore, MemoryCache> {
        ReadThroughService::new(
            Arc::clone(store),
            Arc::new(MemoryCache::new("cli", &CacheConfig::default())),
            ServiceConfig::default(),
        )
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_lookup_fails_when_store_down() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);
        let service = service(&store);

        let err = lookup(&service, &ids(&["1"])).await.unwrap_err();
        assert!(err.to_string().contains("failed to resolve entity 1"));
    }

    #[tokio::test]
    async fn test_lookup_rejects_invalid_id() {
        let service = service(&Arc::new(InMemoryStore::new()));
        assert!(lookup(&service, &ids(&["abc"])).await.is_err());
        assert!(lookup(&service, &ids(&["1", "-2"])).await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_not_found_succeeds() {
        let service = service(&Arc::new(InMemoryStore::new()));
        assert!(lookup(&service, &ids(&["1"])).await.is_ok());
        assert!(lookup(&service, &ids(&["1", "2"])).await.is_ok());
    }
}
