//! Entity identifiers, stored rows and provenance-tagged records.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

/// Prefix shared by every entity cache key.
pub const CACHE_KEY_PREFIX: &str = "entity:";

/// Positive integer identifier of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct EntityId(i64);

impl EntityId {
    /// Raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }

    /// Canonical cache key, e.g. `entity:42`.
    pub fn cache_key(self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for EntityId {
    type Error = Error;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if raw <= 0 {
            return Err(Error::invalid(format!("entity id must be positive, got {raw}")));
        }
        Ok(Self(raw))
    }
}

impl From<EntityId> for i64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Conversion from loosely-typed caller input into a validated [`EntityId`].
///
/// Absent (`None`), zero, negative and non-integer inputs all fail with
/// [`Error::InvalidArgument`].
pub trait IntoEntityId {
    /// Validate and convert.
    fn into_entity_id(self) -> Result<EntityId, Error>;
}

impl IntoEntityId for EntityId {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        Ok(self)
    }
}

impl IntoEntityId for i64 {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        EntityId::try_from(self)
    }
}

impl IntoEntityId for i32 {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        EntityId::try_from(i64::from(self))
    }
}

impl IntoEntityId for u64 {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        let raw = i64::try_from(self)
            .map_err(|_| Error::invalid(format!("entity id {self} is out of range")))?;
        EntityId::try_from(raw)
    }
}

impl IntoEntityId for &str {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        let raw = self
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::invalid(format!("entity id {self:?} is not an integer")))?;
        EntityId::try_from(raw)
    }
}

impl IntoEntityId for String {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        self.as_str().into_entity_id()
    }
}

impl<T: IntoEntityId> IntoEntityId for Option<T> {
    fn into_entity_id(self) -> Result<EntityId, Error> {
        match self {
            Some(raw) => raw.into_entity_id(),
            None => Err(Error::invalid("entity id is missing")),
        }
    }
}

/// Entity as persisted by the store and serialized into the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Where a record was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Cache,
    Store,
}

/// Immutable snapshot returned to callers.
///
/// `origin`, `stale` and `store_latency` are provenance attached by the
/// service; they are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
    pub stale: bool,
    #[serde(
        rename = "store_latency_ms",
        serialize_with = "serialize_latency_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub store_latency: Option<Duration>,
}

impl EntityRecord {
    /// Fresh record read from the store.
    pub fn from_store(row: EntityRow, latency: Duration) -> Self {
        Self::with_provenance(row, Origin::Store, false, Some(latency))
    }

    /// Record served from a fresh cache entry.
    pub fn from_cache(row: EntityRow) -> Self {
        Self::with_provenance(row, Origin::Cache, false, None)
    }

    /// Record served from a soft-expired cache entry while the store is down.
    pub fn stale_from_cache(row: EntityRow) -> Self {
        Self::with_provenance(row, Origin::Cache, true, None)
    }

    fn with_provenance(
        row: EntityRow,
        origin: Origin,
        stale: bool,
        store_latency: Option<Duration>,
    ) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            created_at: row.created_at,
            origin,
            stale,
            store_latency,
        }
    }

    /// Strip provenance, leaving the persisted shape.
    pub fn to_row(&self) -> EntityRow {
        EntityRow {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

fn serialize_latency_ms<S: Serializer>(
    latency: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match latency {
        Some(d) => serializer.serialize_f64(d.as_secs_f64() * 1000.0),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> EntityRow {
        EntityRow {
            id: EntityId::try_from(7).unwrap(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!(matches!((-1i64).into_entity_id(), Err(Error::InvalidArgument(_))));
        assert!(matches!(0i64.into_entity_id(), Err(Error::InvalidArgument(_))));
        assert!(matches!(None::<i64>.into_entity_id(), Err(Error::InvalidArgument(_))));
        assert!(matches!("abc".into_entity_id(), Err(Error::InvalidArgument(_))));
        assert!(matches!("1.5".into_entity_id(), Err(Error::InvalidArgument(_))));
        assert!(matches!(u64::MAX.into_entity_id(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_valid_ids_accepted() {
        assert_eq!(42i64.into_entity_id().unwrap().get(), 42);
        assert_eq!(" 42 ".into_entity_id().unwrap().get(), 42);
        assert_eq!(Some(3i32).into_entity_id().unwrap().get(), 3);
    }

    #[test]
    fn test_cache_key() {
        let id = EntityId::try_from(42).unwrap();
        assert_eq!(id.cache_key(), "entity:42");
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_row_payload_has_no_provenance() {
        let json = serde_json::to_value(row()).unwrap();
        assert_eq!(json["id"], 7);
        assert!(json.get("origin").is_none());
        assert!(json.get("stale").is_none());

        let back: EntityRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row());
    }

    #[test]
    fn test_row_with_invalid_id_fails_to_decode() {
        let json = serde_json::json!({
            "id": 0,
            "name": "x",
            "email": "x@example.com",
            "created_at": "2024-01-01T00:00:00Z",
        });
        assert!(serde_json::from_value::<EntityRow>(json).is_err());
    }

    #[test]
    fn test_record_provenance() {
        let record = EntityRecord::from_store(row(), Duration::from_millis(3));
        assert_eq!(record.origin, Origin::Store);
        assert!(!record.stale);
        assert_eq!(record.to_row(), row());

        let stale = EntityRecord::stale_from_cache(row());
        assert_eq!(stale.origin, Origin::Cache);
        assert!(stale.stale);
        assert_eq!(stale.store_latency, None);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["origin"], "store");
        assert_eq!(json["store_latency_ms"], 3.0);
    }
}
