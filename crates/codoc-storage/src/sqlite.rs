//! SQLite document store

use crate::{DocumentStore, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite document store
///
/// Embedded persistence suitable for single-node deployments.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };

        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };

        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT data FROM documents WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn store(&self, id: &str, data: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO documents (id, data, updated_at)
            VALUES (?1, ?2, strftime('%s', 'now') * 1000)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![id, data],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let affected = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(affected > 0)
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count > 0)
    }
}
