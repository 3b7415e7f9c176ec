//! In-memory store backends
//!
//! Used by tests and by single-node deployments that do not need the
//! entity or session state to survive a restart.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::entity::{
    ChangeCursor, EntityKind, EntityRecord, EntityRepository, EntityWrite, ScopeFilter,
};
use super::error::{StoreError, StoreResult};
use super::kv::KeyValueStore;

// ============================================================================
// Entity Repository
// ============================================================================

/// In-memory repository for one entity kind
pub struct MemoryEntityRepository {
    kind: EntityKind,
    records: RwLock<HashMap<String, EntityRecord>>,
}

impl MemoryEntityRepository {
    /// Create an empty repository
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a record verbatim, bypassing versioning
    pub async fn insert(&self, record: EntityRecord) {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record);
    }

    /// Number of stored records, tombstones included
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the repository holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl EntityRepository for MemoryEntityRepository {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn create(&self, id: &str, write: EntityWrite) -> StoreResult<EntityRecord> {
        let mut records = self.records.write().await;

        let version = match records.get(id) {
            Some(existing) if existing.is_live() => {
                return Err(StoreError::AlreadyExists(format!("{}/{}", self.kind, id)));
            }
            Some(tombstone) => tombstone.version + 1,
            None => 1,
        };

        let record = EntityRecord {
            id: id.to_string(),
            kind: self.kind,
            data: write.data,
            branch_id: write.branch_id,
            version,
            created_at: write.modified_at,
            updated_at: write.modified_at,
            deleted: false,
        };
        records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, write: EntityWrite) -> StoreResult<EntityRecord> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(id)
            .filter(|r| r.is_live())
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", self.kind, id)))?;

        record.data = write.data;
        if write.branch_id.is_some() {
            record.branch_id = write.branch_id;
        }
        record.version += 1;
        record.updated_at = write.modified_at;
        Ok(record.clone())
    }

    async fn delete(&self, id: &str, deleted_at: DateTime<Utc>) -> StoreResult<()> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(id)
            .filter(|r| r.is_live())
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", self.kind, id)))?;

        record.deleted = true;
        record.version += 1;
        record.updated_at = deleted_at;
        Ok(())
    }

    async fn list_changed_since(
        &self,
        cursor: Option<&ChangeCursor>,
        scope: &ScopeFilter,
        limit: usize,
    ) -> StoreResult<Vec<EntityRecord>> {
        let records = self.records.read().await;

        let mut changed: Vec<EntityRecord> = records
            .values()
            .filter(|r| cursor.map_or(true, |c| c.admits(r)))
            .filter(|r| scope.matches(r))
            .cloned()
            .collect();

        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        changed.truncate(limit);
        Ok(changed)
    }
}

// ============================================================================
// Key/Value Store
// ============================================================================

struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory TTL key/value store
#[derive(Default)]
pub struct MemoryKvStore {
    values: RwLock<HashMap<String, Entry<String>>>,
    sets: RwLock<HashMap<String, Entry<BTreeSet<String>>>>,
}

impl MemoryKvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        {
            let mut values = self.values.write().await;
            let before = values.len();
            values.retain(|_, entry| !entry.is_expired(now));
            removed += before - values.len();
        }

        {
            let mut sets = self.sets.write().await;
            let before = sets.len();
            sets.retain(|_, entry| !entry.is_expired(now));
            removed += before - sets.len();
        }

        removed
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let values = self.values.read().await;
        Ok(values
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.values.write().await.remove(key);
        self.sets.write().await.remove(key);
        Ok(())
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let values = self.values.read().await;

        let mut keys: Vec<String> = values
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let now = Instant::now();
        let mut sets = self.sets.write().await;

        let entry = sets
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(BTreeSet::new(), ttl));
        if entry.is_expired(now) {
            *entry = Entry::new(BTreeSet::new(), ttl);
        }
        entry.value.insert(member.to_string());
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut sets = self.sets.write().await;
        if let Some(entry) = sets.get_mut(key) {
            entry.value.remove(member);
            if entry.value.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn write(data: serde_json::Value, at: DateTime<Utc>) -> EntityWrite {
        EntityWrite {
            data,
            branch_id: None,
            modified_at: at,
        }
    }

    #[tokio::test]
    async fn test_create_update_delete_versions() {
        let repo = MemoryEntityRepository::new(EntityKind::Product);
        let now = Utc::now();

        let created = repo.create("p-1", write(json!({"name": "Tea"}), now)).await.unwrap();
        assert_eq!(created.version, 1);

        let updated = repo
            .update("p-1", write(json!({"name": "Green tea"}), now))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.data["name"], "Green tea");

        repo.delete("p-1", now).await.unwrap();
        let tombstone = repo.get("p-1").await.unwrap().unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.version, 3);

        // Recreating over a tombstone continues the version sequence
        let revived = repo.create("p-1", write(json!({"name": "Tea"}), now)).await.unwrap();
        assert_eq!(revived.version, 4);
        assert!(!revived.deleted);
    }

    #[tokio::test]
    async fn test_create_existing_live_record_fails() {
        let repo = MemoryEntityRepository::new(EntityKind::Product);
        repo.create("p-1", write(json!({}), Utc::now())).await.unwrap();

        let result = repo.create("p-1", write(json!({}), Utc::now())).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let repo = MemoryEntityRepository::new(EntityKind::Product);
        let result = repo.update("nope", write(json!({}), Utc::now())).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_changed_since_orders_and_filters() {
        let repo = MemoryEntityRepository::new(EntityKind::Product);
        let base = Utc::now() - ChronoDuration::hours(1);

        repo.create("b", write(json!({}), base + ChronoDuration::minutes(2))).await.unwrap();
        repo.create("a", write(json!({}), base + ChronoDuration::minutes(2))).await.unwrap();
        repo.create("c", write(json!({}), base + ChronoDuration::minutes(1))).await.unwrap();
        repo.create("old", write(json!({}), base - ChronoDuration::minutes(1))).await.unwrap();

        let changed = repo
            .list_changed_since(Some(&ChangeCursor::at(base)), &ScopeFilter::default(), 10)
            .await
            .unwrap();
        let ids: Vec<_> = changed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let limited = repo
            .list_changed_since(None, &ScopeFilter::default(), 2)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, "old");

        // Resuming inside a run of equal markers continues by id
        let resumed = repo
            .list_changed_since(Some(&ChangeCursor::after(&changed[1])), &ScopeFilter::default(), 10)
            .await
            .unwrap();
        let ids: Vec<_> = resumed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_kv_ttl_expiry() {
        let store = MemoryKvStore::new();
        store
            .set("short", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.set("long", "v".to_string(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.list_keys_by_prefix("").await.unwrap(), vec!["long"]);
        assert_eq!(store.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_kv_prefix_listing() {
        let store = MemoryKvStore::new();
        for key in ["batch:2", "batch:1", "session:1"] {
            store.set(key, "{}".to_string(), None).await.unwrap();
        }

        let keys = store.list_keys_by_prefix("batch:").await.unwrap();
        assert_eq!(keys, vec!["batch:1", "batch:2"]);
    }

    #[tokio::test]
    async fn test_kv_set_operations() {
        let store = MemoryKvStore::new();
        store.set_add("device:1", "s-2", None).await.unwrap();
        store.set_add("device:1", "s-1", None).await.unwrap();
        store.set_add("device:1", "s-1", None).await.unwrap();

        assert_eq!(store.set_members("device:1").await.unwrap(), vec!["s-1", "s-2"]);

        store.set_remove("device:1", "s-1").await.unwrap();
        store.set_remove("device:1", "missing").await.unwrap();
        assert_eq!(store.set_members("device:1").await.unwrap(), vec!["s-2"]);

        store.set_remove("device:1", "s-2").await.unwrap();
        assert!(store.set_members("device:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kv_concurrent_set_add_keeps_every_member() {
        let store = std::sync::Arc::new(MemoryKvStore::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.set_add("device:race", &format!("s-{i:02}"), None).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.set_members("device:race").await.unwrap().len(), 16);
    }
}
