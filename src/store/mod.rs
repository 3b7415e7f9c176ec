//! Collaborator seams consumed by the sync core
//!
//! - [`EntityRepository`] / [`EntityRegistry`]: typed access to domain records
//! - [`KeyValueStore`]: TTL key/value persistence for batches and sessions
//!
//! In-memory and SQLite implementations are provided for both.

mod entity;
mod error;
pub mod kv;
mod memory;
mod sqlite;

pub use entity::{
    ChangeCursor, EntityKind, EntityRecord, EntityRegistry, EntityRepository, EntityWrite,
    ParseEntityKindError, ScopeFilter,
};
pub use error::{StoreError, StoreResult};
pub use kv::KeyValueStore;
pub use memory::{MemoryEntityRepository, MemoryKvStore};
pub use sqlite::{SqliteEntityRepository, SqliteKvStore};
