use std::sync::Arc;

use anyhow::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::Value;

use super::DurableStore;

/// SQLite-based durable store. Values are kept as JSON text, one row per key.
pub struct SqliteDurableStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDurableStore {
    /// Creates a new SQLite durable store with the specified database file path.
    pub fn open(path: &str) -> Result<Arc<Self>> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE |
                    OpenFlags::SQLITE_OPEN_CREATE |
                    OpenFlags::SQLITE_OPEN_URI
            )
            .with_init(|c| {
                c.busy_timeout(std::time::Duration::from_millis(500))?;
                c.execute_batch(
                    "CREATE TABLE IF NOT EXISTS csync_kv (
                        key TEXT PRIMARY KEY NOT NULL,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
                    );"
                )?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;

        Ok(Arc::new(Self { pool }))
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

impl DurableStore for SqliteDurableStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM csync_kv WHERE key=?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO csync_kv(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=strftime('%s','now')",
            params![key, serde_json::to_string(&value)?],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM csync_kv WHERE key=?1", params![key])?;
        Ok(())
    }
}
