//! MongoDB-backed store.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId};
use mongodb::{options::ClientOptions, Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::models::{EntityId, EntityRow};
use super::Store;
use crate::error::StoreError;

/// Connection settings for [`MongoStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// MongoDB connection string.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Collection holding entity documents.
    pub collection: String,
    /// Maximum pooled connections.
    pub max_pool_size: u32,
    /// Connect and server-selection timeout.
    pub connect_timeout: Duration,
    /// How long an idle pooled connection is kept.
    pub idle_timeout: Duration,
}

/// Entity document as stored in MongoDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    object_id: Option<ObjectId>,
    id: i64,
    name: String,
    email: String,
    created_at: bson::DateTime,
}

impl EntityDocument {
    fn into_row(self) -> Result<EntityRow, StoreError> {
        let id = EntityId::try_from(self.id)
            .map_err(|_| StoreError::Unavailable(format!("malformed document: id {}", self.id)))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at.timestamp_millis())
            .ok_or_else(|| {
                StoreError::Unavailable(format!("malformed document: created_at for id {id}"))
            })?;

        Ok(EntityRow {
            id,
            name: self.name,
            email: self.email,
            created_at,
        })
    }
}

fn unavailable(err: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Store over a pooled MongoDB client.
///
/// The client is created once and shared; every lookup borrows a pooled
/// connection for exactly one round-trip.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    db: mongodb::Database,
    collection: Collection<EntityDocument>,
}

impl MongoStore {
    /// Build the pooled client.
    ///
    /// An unreachable server does not fail construction: the store starts
    /// degraded and the read path falls back to the cache until it recovers.
    ///
    /// # Errors
    /// Returns error if the connection string cannot be parsed.
    pub async fn connect(options: &StoreOptions) -> Result<Self, StoreError> {
        let mut client_options = ClientOptions::parse(&options.uri).await.map_err(unavailable)?;
        client_options.app_name = Some("entity-cache".to_string());
        client_options.max_pool_size = Some(options.max_pool_size);
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.server_selection_timeout = Some(options.connect_timeout);
        client_options.max_idle_time = Some(options.idle_timeout);

        let client = Client::with_options(client_options).map_err(unavailable)?;
        let db = client.database(&options.database);
        let collection = db.collection(&options.collection);
        let store = Self {
            client,
            db,
            collection,
        };

        match store.ping().await {
            Ok(()) => info!("Successfully connected to MongoDB"),
            Err(e) => warn!("MongoDB not reachable at startup, running degraded: {}", e),
        }

        Ok(store)
    }

    /// Close pooled connections.
    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
        info!("MongoDB connection pool closed");
    }
}

impl Store for MongoStore {
    async fn find_by_id(&self, id: EntityId) -> Result<Option<EntityRow>, StoreError> {
        let started = Instant::now();
        let result = self
            .collection
            .find_one(doc! { "id": id.get() })
            .await
            .map_err(unavailable)?;
        debug!(
            "DB get entity {}: {:?} in {:?}",
            id,
            result.is_some(),
            started.elapsed()
        );

        result.map(EntityDocument::into_row).transpose()
    }

    async fn find_by_ids(&self, ids: &[EntityId]) -> Result<Vec<EntityRow>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let started = Instant::now();
        let documents: Vec<EntityDocument> = self
            .collection
            .find(doc! { "id": { "$in": raw } })
            .await
            .map_err(unavailable)?
            .try_collect()
            .await
            .map_err(unavailable)?;
        debug!(
            "DB batch get {} entities: {} found in {:?}",
            ids.len(),
            documents.len(),
            started.elapsed()
        );

        documents.into_iter().map(EntityDocument::into_row).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: i64) -> EntityDocument {
        EntityDocument {
            object_id: None,
            id,
            name: "Grace".into(),
            email: "grace@example.com".into(),
            created_at: bson::DateTime::from_millis(1_700_000_000_000),
        }
    }

    #[test]
    fn test_document_into_row() {
        let row = document(5).into_row().unwrap();
        assert_eq!(row.id.get(), 5);
        assert_eq!(row.name, "Grace");
        assert_eq!(row.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_document_with_invalid_id_is_rejected() {
        assert!(matches!(
            document(0).into_row(),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_document_decodes_without_object_id() {
        let raw = doc! {
            "id": 9_i64,
            "name": "Linus",
            "email": "linus@example.com",
            "created_at": bson::DateTime::from_millis(0),
        };
        let decoded: EntityDocument = bson::from_document(raw).unwrap();
        assert!(decoded.object_id.is_none());
        assert_eq!(decoded.into_row().unwrap().id.get(), 9);
    }
}
