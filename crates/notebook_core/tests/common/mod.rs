#![allow(dead_code)]

use notebook_core::{BackendKind, SqliteBackend, StorageBackend, StorageError, StorageResult};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Write faults shared between a test and its [`FlakyBackend`].
#[derive(Default)]
pub struct WriteFaults {
    documents: AtomicBool,
    blobs: AtomicBool,
    keys: Mutex<BTreeSet<String>>,
}

impl WriteFaults {
    /// Fails every document and blob write.
    pub fn fail_all(&self) {
        self.documents.store(true, Ordering::SeqCst);
        self.blobs.store(true, Ordering::SeqCst);
    }

    /// Fails document writes only; blob writes keep succeeding.
    pub fn fail_documents(&self) {
        self.documents.store(true, Ordering::SeqCst);
    }

    /// Fails writes of one document key.
    pub fn fail_document(&self, key: &str) {
        self.keys.lock().unwrap().insert(key.to_string());
    }

    pub fn clear(&self) {
        self.documents.store(false, Ordering::SeqCst);
        self.blobs.store(false, Ordering::SeqCst);
        self.keys.lock().unwrap().clear();
    }

    fn check_document(&self, key: &str) -> StorageResult<()> {
        if self.documents.load(Ordering::SeqCst) || self.keys.lock().unwrap().contains(key) {
            return Err(quota_exceeded());
        }
        Ok(())
    }

    fn check_blob(&self) -> StorageResult<()> {
        if self.blobs.load(Ordering::SeqCst) {
            return Err(quota_exceeded());
        }
        Ok(())
    }
}

fn quota_exceeded() -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "quota exceeded",
    ))
}

/// Durable backend whose writes can be made to fail on demand.
pub struct FlakyBackend {
    inner: SqliteBackend,
    faults: Arc<WriteFaults>,
}

impl FlakyBackend {
    /// In-memory backend plus the handle that injects faults into it.
    pub fn new(namespace: &str) -> (Self, Arc<WriteFaults>) {
        Self::wrap(SqliteBackend::open_in_memory(namespace).unwrap())
    }

    pub fn wrap(inner: SqliteBackend) -> (Self, Arc<WriteFaults>) {
        let faults = Arc::new(WriteFaults::default());
        let backend = Self {
            inner,
            faults: Arc::clone(&faults),
        };
        (backend, faults)
    }
}

impl StorageBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    fn read_document(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.read_document(key)
    }

    fn write_document(&self, key: &str, value: &str) -> StorageResult<()> {
        self.faults.check_document(key)?;
        self.inner.write_document(key, value)
    }

    fn document_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.document_keys()
    }

    fn supports_blobs(&self) -> bool {
        true
    }

    fn read_blob(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read_blob(id)
    }

    fn write_blob(&self, id: &str, bytes: &[u8]) -> StorageResult<()> {
        self.faults.check_blob()?;
        self.inner.write_blob(id, bytes)
    }

    fn remove_blob(&self, id: &str) -> StorageResult<()> {
        self.inner.remove_blob(id)
    }

    fn blob_ids(&self) -> StorageResult<Vec<String>> {
        self.inner.blob_ids()
    }
}

/// Makes the durable engine unopenable by occupying its directory with a file.
pub fn block_durable_engine(data_dir: &std::path::Path) {
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(data_dir.join("notebooks"), b"not a directory").unwrap();
}
