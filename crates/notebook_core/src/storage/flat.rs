//! Flat string key/value fallback engine.
//!
//! # Responsibility
//! - Persist one JSON object of `string -> string` entries in a single file.
//! - Expose a per-notebook view by prefixing keys with the notebook name.
//!
//! # Invariants
//! - The file is replaced via write-to-temp + rename, never edited in place.
//! - Every operation re-reads the file, so several handles on the same file
//!   in one process observe each other's writes.
//! - Blob operations are unsupported and return empty results.

use super::{validate_document_key, BackendKind, StorageBackend, StorageError, StorageResult};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const NAMESPACE_KEY_PREFIX: &str = "notebook_";

// Serializes read-modify-write cycles across every handle in the process.
static FLAT_STORE_WRITE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Single-file string map.
#[derive(Debug, Clone)]
pub struct FlatStore {
    path: PathBuf,
}

impl FlatStore {
    /// Prepares the store at `path`; the file itself is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = FLAT_STORE_WRITE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.replace(&entries)
    }

    pub fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|err| StorageError::Corrupted(err.to_string()))
    }

    fn replace(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut staged, entries)?;
        staged.flush()?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Notebook-scoped view over a [`FlatStore`].
#[derive(Debug, Clone)]
pub struct FlatBackend {
    store: FlatStore,
    namespace: String,
    key_prefix: String,
}

impl FlatBackend {
    pub fn new(store: FlatStore, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key_prefix = format!("{NAMESPACE_KEY_PREFIX}{namespace}_");
        Self {
            store,
            namespace,
            key_prefix,
        }
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

impl StorageBackend for FlatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn read_document(&self, key: &str) -> StorageResult<Option<String>> {
        self.store.get(&self.scoped_key(key))
    }

    fn write_document(&self, key: &str, value: &str) -> StorageResult<()> {
        self.store.set(&self.scoped_key(key), value)
    }

    fn document_keys(&self) -> StorageResult<Vec<String>> {
        // A remainder that fails key validation belongs to another notebook
        // whose name extends this one (`a` vs `a_b`).
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(self.key_prefix.as_str())
                    .map(str::to_string)
            })
            .filter(|rest| validate_document_key(rest).is_ok())
            .collect())
    }

    fn supports_blobs(&self) -> bool {
        false
    }

    fn read_blob(&self, _id: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn write_blob(&self, _id: &str, _bytes: &[u8]) -> StorageResult<()> {
        Ok(())
    }

    fn remove_blob(&self, _id: &str) -> StorageResult<()> {
        Ok(())
    }

    fn blob_ids(&self) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}
