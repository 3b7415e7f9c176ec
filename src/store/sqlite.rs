//! SQLite store backends
//!
//! Entity records and key/value entries persisted through sqlx. Timestamps
//! are stored as unix milliseconds so range scans compare integers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

use super::entity::{
    ChangeCursor, EntityKind, EntityRecord, EntityRepository, EntityWrite, ScopeFilter,
};
use super::error::{StoreError, StoreResult};
use super::kv::KeyValueStore;

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp: {}", ms)))
}

fn expiry_millis(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64)
}

// ============================================================================
// Entity Repository
// ============================================================================

/// SQLite-backed repository for one entity kind
///
/// All kinds share the `entities` table, keyed by `(kind, id)`.
#[derive(Clone)]
pub struct SqliteEntityRepository {
    pool: SqlitePool,
    kind: EntityKind,
}

impl SqliteEntityRepository {
    pub fn new(pool: SqlitePool, kind: EntityKind) -> Self {
        Self { pool, kind }
    }

    fn key(&self, id: &str) -> String {
        format!("{}/{}", self.kind, id)
    }
}

#[async_trait]
impl EntityRepository for SqliteEntityRepository {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, kind, data, branch_id, version, created_at, updated_at, deleted
            FROM entities
            WHERE kind = ? AND id = ?
            "#,
        )
        .bind(self.kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_record).transpose()
    }

    async fn create(&self, id: &str, write: EntityWrite) -> StoreResult<EntityRecord> {
        let data = serde_json::to_string(&write.data)?;
        let at = to_millis(write.modified_at);

        // Only a tombstone may be overwritten by a create
        let result = sqlx::query(
            r#"
            INSERT INTO entities (kind, id, data, branch_id, version, created_at, updated_at, deleted)
            VALUES (?, ?, ?, ?, 1, ?, ?, 0)
            ON CONFLICT(kind, id) DO UPDATE SET
                data = excluded.data,
                branch_id = excluded.branch_id,
                version = entities.version + 1,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted = 0
            WHERE entities.deleted = 1
            "#,
        )
        .bind(self.kind.as_str())
        .bind(id)
        .bind(&data)
        .bind(&write.branch_id)
        .bind(at)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(self.key(id)));
        }

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.key(id)))
    }

    async fn update(&self, id: &str, write: EntityWrite) -> StoreResult<EntityRecord> {
        let data = serde_json::to_string(&write.data)?;

        let result = sqlx::query(
            r#"
            UPDATE entities SET
                data = ?,
                branch_id = COALESCE(?, branch_id),
                version = version + 1,
                updated_at = ?
            WHERE kind = ? AND id = ? AND deleted = 0
            "#,
        )
        .bind(&data)
        .bind(&write.branch_id)
        .bind(to_millis(write.modified_at))
        .bind(self.kind.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(self.key(id)));
        }

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.key(id)))
    }

    async fn delete(&self, id: &str, deleted_at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE entities SET
                deleted = 1,
                version = version + 1,
                updated_at = ?
            WHERE kind = ? AND id = ? AND deleted = 0
            "#,
        )
        .bind(to_millis(deleted_at))
        .bind(self.kind.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(self.key(id)));
        }
        Ok(())
    }

    async fn list_changed_since(
        &self,
        cursor: Option<&ChangeCursor>,
        scope: &ScopeFilter,
        limit: usize,
    ) -> StoreResult<Vec<EntityRecord>> {
        let watermark = cursor.map(|c| to_millis(c.updated_at));
        let after_id = cursor.and_then(|c| c.after_id.as_deref());
        let branch = scope
            .branch_id
            .as_deref()
            .filter(|_| self.kind.is_branch_scoped());

        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, kind, data, branch_id, version, created_at, updated_at, deleted
            FROM entities
            WHERE kind = ?
              AND (? IS NULL OR updated_at > ? OR (updated_at = ? AND id > ?))
              AND (? IS NULL OR branch_id = ?)
              AND (? = 1 OR deleted = 0)
            ORDER BY updated_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(self.kind.as_str())
        .bind(watermark)
        .bind(watermark)
        .bind(watermark)
        .bind(after_id)
        .bind(branch)
        .bind(branch)
        .bind(scope.include_deleted)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntityRow::into_record).collect()
    }
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: String,
    kind: String,
    data: String,
    branch_id: Option<String>,
    version: i64,
    created_at: i64,
    updated_at: i64,
    deleted: bool,
}

impl EntityRow {
    fn into_record(self) -> StoreResult<EntityRecord> {
        let kind = self
            .kind
            .parse::<EntityKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(EntityRecord {
            id: self.id,
            kind,
            data: serde_json::from_str(&self.data)?,
            branch_id: self.branch_id,
            version: self.version as u64,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            deleted: self.deleted,
        })
    }
}

// ============================================================================
// Key/Value Store
// ============================================================================

/// SQLite-backed TTL key/value store
///
/// Expired rows are ignored on read and removed by [`SqliteKvStore::purge_expired`].
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete expired entries and set members
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Utc::now().timestamp_millis();

        let entries = sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let members = sqlx::query("DELETE FROM kv_sets WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(entries.rows_affected() + members.rows_affected())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM kv_entries
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_millis(ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM kv_sets WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT key FROM kv_entries
            WHERE substr(key, 1, ?) = ?
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY key ASC
            "#,
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(Utc::now().timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = expiry_millis(ttl);

        // Single-statement upsert keeps concurrent adds from losing members
        sqlx::query(
            r#"
            INSERT INTO kv_sets (key, member, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key, member) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if expires_at.is_some() {
            sqlx::query("UPDATE kv_sets SET expires_at = ? WHERE key = ?")
                .bind(expires_at)
                .bind(key)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_sets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT member FROM kv_sets
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY member ASC
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(member,)| member).collect())
    }
}
