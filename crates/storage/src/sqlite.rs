//! SQLite row store implementation.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{Error, Result, Row, RowKey, RowStore};

/// SQLite-backed row store.
///
/// Rows of every table share one `rows` table, stored as JSON text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a row store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        tracing::debug!(path = %path.as_ref().display(), "opening row store");
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory row store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rows (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (tbl, key)
            );
            "#,
        )?;
        Ok(())
    }
}

impl RowStore for SqliteStore {
    fn read(&self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM rows WHERE tbl = ?1 AND key = ?2",
                params![table, key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn write(&self, table: &str, key: &RowKey, row: &Row) -> Result<()> {
        let data = serde_json::to_string(row)?;
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        conn.execute(
            "INSERT INTO rows (tbl, key, data) VALUES (?1, ?2, ?3)
             ON CONFLICT (tbl, key) DO UPDATE SET data = excluded.data",
            params![table, key.as_str(), data],
        )?;
        Ok(())
    }

    fn delete(&self, table: &str, key: &RowKey) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let removed = conn.execute(
            "DELETE FROM rows WHERE tbl = ?1 AND key = ?2",
            params![table, key.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn scan(&self, table: &str) -> Result<Vec<(RowKey, Row)>> {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let mut stmt = conn.prepare("SELECT key, data FROM rows WHERE tbl = ?1 ORDER BY key")?;

        let raw = stmt
            .query_map([table], |row| {
                let key: String = row.get(0)?;
                let data: String = row.get(1)?;
                Ok((key, data))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // A corrupt row is an error, not a silently skipped record.
        raw.into_iter()
            .map(|(key, data)| Ok((RowKey(key), serde_json::from_str(&data)?)))
            .collect()
    }
}
