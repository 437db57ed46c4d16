//! Durable notebook engine on top of one SQLite file per notebook.
//!
//! # Responsibility
//! - Store whole JSON documents in `documents` and raw bytes in `blobs`.
//!
//! # Invariants
//! - Each write is a single-statement upsert, so a failure leaves the prior
//!   row untouched.

use super::{BackendKind, StorageBackend, StorageResult};
use crate::db::{open_db, open_db_in_memory};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite-backed notebook store.
pub struct SqliteBackend {
    conn: Connection,
    namespace: String,
}

impl SqliteBackend {
    /// Opens (or creates) the notebook file at `path`.
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> StorageResult<Self> {
        let conn = open_db(path)?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    /// Opens a throwaway in-memory notebook store.
    pub fn open_in_memory(namespace: impl Into<String>) -> StorageResult<Self> {
        let conn = open_db_in_memory()?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn collect_keys(&self, sql: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }
}

impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn read_document(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM documents WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_document(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO documents (key, value, updated_at)
             VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, value],
        )?;
        Ok(())
    }

    fn document_keys(&self) -> StorageResult<Vec<String>> {
        self.collect_keys("SELECT key FROM documents ORDER BY key ASC;")
    }

    fn supports_blobs(&self) -> bool {
        true
    }

    fn read_blob(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        let bytes = self
            .conn
            .query_row("SELECT data FROM blobs WHERE id = ?1;", [id], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(bytes)
    }

    fn write_blob(&self, id: &str, bytes: &[u8]) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO blobs (id, data, size, updated_at)
             VALUES (?1, ?2, ?3, (strftime('%s', 'now') * 1000))
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                size = excluded.size,
                updated_at = excluded.updated_at;",
            params![id, bytes, bytes.len() as i64],
        )?;
        Ok(())
    }

    fn remove_blob(&self, id: &str) -> StorageResult<()> {
        self.conn.execute("DELETE FROM blobs WHERE id = ?1;", [id])?;
        Ok(())
    }

    fn blob_ids(&self) -> StorageResult<Vec<String>> {
        self.collect_keys("SELECT id FROM blobs ORDER BY id ASC;")
    }
}
