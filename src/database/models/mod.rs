//! Database model exports.

pub mod entity;

pub use entity::{CACHE_KEY_PREFIX, EntityId, EntityRecord, EntityRow, IntoEntityId, Origin};
