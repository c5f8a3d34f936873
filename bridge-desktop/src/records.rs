//! Record Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{RecordStore, RecordTable},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use tracing::debug;

const CREATE_RECORDS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        table_name TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (table_name, key)
    )
"#;

/// SQLite-backed record store implementation
///
/// Every logical [`RecordTable`] shares one physical `records` table keyed by
/// `(table_name, key)`. Values are stored as JSON text and written with
/// single-row upserts.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (or create) a record store at the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        Self::create_schema(&pool).await?;

        debug!(path = ?db_path, "Initialized record store");

        Ok(Self { pool })
    }

    /// Create an in-memory record store (for testing)
    ///
    /// The pool is pinned to a single connection that never expires, since
    /// each SQLite in-memory connection owns a separate database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        Self::create_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_RECORDS_TABLE)
            .execute(pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    /// Get the current Unix timestamp
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_all(&self, table: RecordTable) -> Result<Vec<(String, serde_json::Value)>> {
        let rows = sqlx::query("SELECT key, value FROM records WHERE table_name = ? ORDER BY rowid")
            .bind(table.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to list {}: {}", table, e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get(0);
            let raw: String = row.get(1);
            records.push((key, serde_json::from_str(&raw)?));
        }

        debug!(table = %table, count = records.len(), "Loaded records");
        Ok(records)
    }

    async fn get(&self, table: RecordTable, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM records WHERE table_name = ? AND key = ?")
            .bind(table.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to get record: {}", e)))?;

        match row {
            Some(row) => {
                let raw: String = row.get(0);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, table: RecordTable, key: &str, value: serde_json::Value) -> Result<()> {
        let raw = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO records (table_name, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(table_name, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(table.as_str())
        .bind(key)
        .bind(raw)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to put record: {}", e)))?;

        debug!(table = %table, key = key, "Stored record");
        Ok(())
    }

    async fn delete(&self, table: RecordTable, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE table_name = ? AND key = ?")
            .bind(table.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to delete record: {}", e)))?;

        debug!(table = %table, key = key, "Deleted record");
        Ok(())
    }

    async fn clear(&self, table: RecordTable) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE table_name = ?")
            .bind(table.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to clear {}: {}", table, e)))?;

        debug!(table = %table, "Cleared records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteRecordStore::in_memory().await.unwrap();

        store
            .put(RecordTable::Downloads, "a", json!({"title": "Episode 1"}))
            .await
            .unwrap();

        let value = store.get(RecordTable::Downloads, "a").await.unwrap();
        assert_eq!(value, Some(json!({"title": "Episode 1"})));

        let missing = store.get(RecordTable::Downloads, "b").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_put_is_upsert() {
        let store = SqliteRecordStore::in_memory().await.unwrap();

        store
            .put(RecordTable::Downloads, "a", json!({"progress": 10}))
            .await
            .unwrap();
        store
            .put(RecordTable::Downloads, "a", json!({"progress": 40}))
            .await
            .unwrap();

        let all = store.get_all(RecordTable::Downloads).await.unwrap();
        assert_eq!(all, vec![("a".to_string(), json!({"progress": 40}))]);
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let store = SqliteRecordStore::in_memory().await.unwrap();

        store
            .put(RecordTable::Downloads, "k", json!(1))
            .await
            .unwrap();
        store
            .put(RecordTable::MediaAccess, "k", json!(2))
            .await
            .unwrap();

        store.clear(RecordTable::Downloads).await.unwrap();

        assert!(store.get_all(RecordTable::Downloads).await.unwrap().is_empty());
        assert_eq!(
            store.get(RecordTable::MediaAccess, "k").await.unwrap(),
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.delete(RecordTable::Downloads, "nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.db");

        {
            let store = SqliteRecordStore::new(path.clone()).await.unwrap();
            store
                .put(RecordTable::MediaAccess, "movie-1", json!("2024-01-01T00:00:00Z"))
                .await
                .unwrap();
        }

        let reopened = SqliteRecordStore::new(path).await.unwrap();
        let value = reopened
            .get(RecordTable::MediaAccess, "movie-1")
            .await
            .unwrap();
        assert_eq!(value, Some(json!("2024-01-01T00:00:00Z")));
    }
}
