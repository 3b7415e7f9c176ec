//! Key/value session store seam
//!
//! Batches, offline sessions and queued offline writes are persisted as JSON
//! strings in a TTL-capable key/value store.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::StoreResult;

/// TTL-capable key/value store
///
/// Expired entries must behave as absent. The set operations are atomic
/// per call so concurrent writers never lose members.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value, replacing any previous one
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete a value; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All live keys starting with `prefix`, sorted
    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Add a member to the set stored at `key`
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a member from the set stored at `key`
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Members of the set stored at `key`, sorted
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;
}

/// Load and deserialize a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    store
        .get(key)
        .await?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(Into::into)
}

/// Serialize and store a JSON value
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw, ttl).await
}
