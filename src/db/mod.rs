//! Database module for SQLite persistence
//!
//! Backs the entity, key/value and audit collaborators.

mod schema;

pub use schema::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::store::StoreResult;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    // Every connection to an in-memory database sees its own database
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Create a single-connection in-memory pool with the schema applied
pub async fn create_memory_pool() -> StoreResult<SqlitePool> {
    create_pool("sqlite::memory:").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_pool_on_disk_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sync.db").display());

        let pool = create_pool(&url).await.unwrap();
        sqlx::query("INSERT INTO kv_entries (key, value) VALUES ('k', 'v')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        // Reopening re-runs the schema without touching existing rows
        let pool = create_pool(&url).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
