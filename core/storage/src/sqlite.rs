//! SQLite-backed record store.
//!
//! Persists queue records in a single table so the queue survives restarts.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use fieldsync_common::{Error, Result};

use crate::store::RecordStore;

/// Record store using SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn store_err(err: rusqlite::Error) -> Error {
    Error::Store(err.to_string())
}

impl SqliteStore {
    /// Create or open a record database.
    ///
    /// # Arguments
    /// - `db_path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(store_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_records (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(store_err)?;

        info!("Record store opened at {}", db_path.as_ref().display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("sqlite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM queue_records WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        debug!("Upserting record: {}", key);
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO queue_records (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![key, value, chrono::Utc::now().timestamp()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("Deleting record: {}", key);
        let conn = self.conn()?;
        conn.execute("DELETE FROM queue_records WHERE key = ?1", [key])
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM queue_records")
            .map_err(store_err)?;

        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(store_err)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }
}
