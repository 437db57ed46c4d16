//! Storage backend contract and per-session engine selection.
//!
//! # Responsibility
//! - Define the document/blob contract every notebook engine implements.
//! - Pick the durable SQLite engine first and fall back to the flat store
//!   when it cannot be opened.
//!
//! # Invariants
//! - Every backend instance is bound to exactly one notebook namespace.
//! - Reading an absent document yields the caller's default, never an error.
//! - A failed write leaves the previously stored value intact.
//! - Once a selector has fallen back it never tries the durable engine again.

mod flat;
mod sqlite;

pub use flat::{FlatBackend, FlatStore};
pub use sqlite::SqliteBackend;

use crate::db::DbError;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Flat-store file shared by the fallback engine and the notebook registry.
pub const FLAT_STORE_FILE_NAME: &str = "local_storage.json";
const NOTEBOOK_DIR_NAME: &str = "notebooks";
const NOTEBOOK_FILE_PREFIX: &str = "notebook_";
const NOTEBOOK_FILE_EXTENSION: &str = "sqlite3";

/// Storage-layer error.
#[derive(Debug)]
pub enum StorageError {
    /// SQLite bootstrap or statement failure.
    Db(DbError),
    /// File-system failure in the flat store.
    Io(std::io::Error),
    /// Document could not be encoded or decoded as JSON.
    Serialization(serde_json::Error),
    /// Flat store file exists but is not a JSON string map.
    Corrupted(String),
    /// Document key violates the key alphabet.
    InvalidKey(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "document serialization failed: {err}"),
            Self::Corrupted(message) => write!(f, "flat store is corrupted: {message}"),
            Self::InvalidKey(key) => write!(f, "invalid document key: `{key}`"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::Corrupted(_) | Self::InvalidKey(_) => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Which engine a backend instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Transactional SQLite file with document and blob tables.
    Durable,
    /// Flat JSON string map; no blob support.
    Fallback,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Fallback => "fallback",
        }
    }
}

/// Contract shared by both notebook engines.
///
/// Documents are whole JSON texts addressed by short keys; blobs are raw
/// bytes addressed by attachment id.
pub trait StorageBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Notebook name this instance is bound to.
    fn namespace(&self) -> &str;

    fn read_document(&self, key: &str) -> StorageResult<Option<String>>;

    /// Replaces one document atomically.
    fn write_document(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Keys of every document stored in this namespace.
    fn document_keys(&self) -> StorageResult<Vec<String>>;

    fn supports_blobs(&self) -> bool;

    fn read_blob(&self, id: &str) -> StorageResult<Option<Vec<u8>>>;

    fn write_blob(&self, id: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Removes a blob; removing an absent id is not an error.
    fn remove_blob(&self, id: &str) -> StorageResult<()>;

    fn blob_ids(&self) -> StorageResult<Vec<String>>;
}

/// Reads and decodes a document, returning `default` when it was never written.
pub fn get<T: DeserializeOwned>(
    backend: &dyn StorageBackend,
    key: &str,
    default: T,
) -> StorageResult<T> {
    validate_document_key(key)?;
    match backend.read_document(key)? {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(default),
    }
}

/// Encodes and stores a document.
pub fn set<T: Serialize + ?Sized>(
    backend: &dyn StorageBackend,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    validate_document_key(key)?;
    let text = serde_json::to_string(value)?;
    backend.write_document(key, &text)
}

/// Document keys are ASCII alphanumerics and `-` only.
///
/// `_` is reserved as the namespace separator of the flat engine.
pub fn validate_document_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Engine preference from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Durable engine first, fallback on failure.
    #[default]
    Auto,
    /// Skip the durable engine entirely.
    Fallback,
}

/// Opens notebook backends for one application session.
///
/// Remembers a durable-engine failure so every later open in the same
/// session goes straight to the flat store.
#[derive(Debug)]
pub struct BackendSelector {
    data_dir: PathBuf,
    preference: BackendPreference,
    fell_back: bool,
}

impl BackendSelector {
    pub fn new(data_dir: impl Into<PathBuf>, preference: BackendPreference) -> Self {
        Self {
            data_dir: data_dir.into(),
            preference,
            fell_back: false,
        }
    }

    /// Whether this session runs without the durable engine.
    pub fn is_degraded(&self) -> bool {
        self.fell_back || self.preference == BackendPreference::Fallback
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Opens the backend for `notebook`.
    ///
    /// # Errors
    /// - Only when the flat store itself cannot be prepared; durable-engine
    ///   failures are absorbed by falling back.
    pub fn open(&mut self, notebook: &str) -> StorageResult<Box<dyn StorageBackend>> {
        if !self.is_degraded() {
            let path = durable_store_path(&self.data_dir, notebook);
            match SqliteBackend::open(&path, notebook) {
                Ok(backend) => {
                    info!(
                        "event=backend_select module=storage status=ok kind=durable notebook_len={}",
                        notebook.len()
                    );
                    return Ok(Box::new(backend));
                }
                Err(err) => {
                    warn!(
                        "event=backend_select module=storage status=fallback kind=fallback reason=durable_unavailable error={}",
                        err
                    );
                    self.fell_back = true;
                }
            }
        }

        let store = FlatStore::open(flat_store_path(&self.data_dir))?;
        info!(
            "event=backend_select module=storage status=ok kind=fallback notebook_len={}",
            notebook.len()
        );
        Ok(Box::new(FlatBackend::new(store, notebook)))
    }
}

/// Deterministic SQLite file location for one notebook.
pub fn durable_store_path(data_dir: &Path, notebook: &str) -> PathBuf {
    data_dir.join(NOTEBOOK_DIR_NAME).join(format!(
        "{NOTEBOOK_FILE_PREFIX}{}.{NOTEBOOK_FILE_EXTENSION}",
        urlencoding::encode(notebook)
    ))
}

/// Location of the flat store shared by all notebooks and the registry.
pub fn flat_store_path(data_dir: &Path) -> PathBuf {
    data_dir.join(FLAT_STORE_FILE_NAME)
}
