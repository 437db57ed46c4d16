mod common;

use common::block_durable_engine;
use notebook_core::storage::{self, durable_store_path, flat_store_path};
use notebook_core::{
    BackendKind, BackendPreference, BackendSelector, FlatBackend, FlatStore, SqliteBackend,
    StorageBackend, StorageError,
};
use serde_json::{json, Value};

fn durable(dir: &tempfile::TempDir, notebook: &str) -> Box<dyn StorageBackend> {
    Box::new(SqliteBackend::open(durable_store_path(dir.path(), notebook), notebook).unwrap())
}

fn fallback(dir: &tempfile::TempDir, notebook: &str) -> Box<dyn StorageBackend> {
    let store = FlatStore::open(flat_store_path(dir.path())).unwrap();
    Box::new(FlatBackend::new(store, notebook))
}

fn both_engines(dir: &tempfile::TempDir, notebook: &str) -> Vec<Box<dyn StorageBackend>> {
    vec![durable(dir, notebook), fallback(dir, notebook)]
}

#[test]
fn set_then_get_round_trips_on_both_engines() {
    let dir = tempfile::tempdir().unwrap();
    let value = json!({"Work": {"color": "#f00", "icon": "", "pages": []}});

    for backend in both_engines(&dir, "default") {
        storage::set(backend.as_ref(), "sections", &value).unwrap();
        let loaded: Value = storage::get(backend.as_ref(), "sections", json!({})).unwrap();
        assert_eq!(loaded, value, "engine {:?}", backend.kind());
    }
}

#[test]
fn never_written_key_returns_default() {
    let dir = tempfile::tempdir().unwrap();

    for backend in both_engines(&dir, "fresh") {
        let loaded: Value = storage::get(backend.as_ref(), "templates", json!([])).unwrap();
        assert_eq!(loaded, json!([]));
        let again: Value = storage::get(backend.as_ref(), "templates", json!([])).unwrap();
        assert_eq!(again, json!([]));
    }
}

#[test]
fn later_write_replaces_earlier_value() {
    let dir = tempfile::tempdir().unwrap();

    for backend in both_engines(&dir, "default") {
        storage::set(backend.as_ref(), "history", &json!({"p": []})).unwrap();
        storage::set(backend.as_ref(), "history", &json!({"q": []})).unwrap();
        let loaded: Value = storage::get(backend.as_ref(), "history", Value::Null).unwrap();
        assert_eq!(loaded, json!({"q": []}));
    }
}

#[test]
fn notebooks_do_not_see_each_other() {
    let dir = tempfile::tempdir().unwrap();

    for (a, b) in [
        (durable(&dir, "A"), durable(&dir, "B")),
        (fallback(&dir, "A"), fallback(&dir, "B")),
    ] {
        storage::set(a.as_ref(), "sections", &json!({"Only A": []})).unwrap();
        let seen: Value = storage::get(b.as_ref(), "sections", json!({})).unwrap();
        assert_eq!(seen, json!({}));
        assert!(b.document_keys().unwrap().is_empty());
    }
}

#[test]
fn invalid_document_keys_are_rejected_before_reaching_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let backend = fallback(&dir, "default");

    let err = storage::set(backend.as_ref(), "bad_key", &json!(1)).unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey(_)));
    assert!(backend.document_keys().unwrap().is_empty());
}

#[test]
fn durable_engine_enumerates_documents_and_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = durable(&dir, "default");

    storage::set(backend.as_ref(), "sections", &json!({})).unwrap();
    storage::set(backend.as_ref(), "templates", &json!([])).unwrap();
    backend.write_blob("img-1", &[1, 2, 3]).unwrap();

    assert_eq!(
        backend.document_keys().unwrap(),
        vec!["sections".to_string(), "templates".to_string()]
    );
    assert_eq!(backend.blob_ids().unwrap(), vec!["img-1".to_string()]);
    assert_eq!(backend.read_blob("img-1").unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(backend.read_blob("missing").unwrap(), None);

    backend.remove_blob("img-1").unwrap();
    backend.remove_blob("img-1").unwrap();
    assert!(backend.blob_ids().unwrap().is_empty());
}

#[test]
fn fallback_engine_has_no_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = fallback(&dir, "default");

    assert!(!backend.supports_blobs());
    backend.write_blob("img-1", &[1, 2, 3]).unwrap();
    assert_eq!(backend.read_blob("img-1").unwrap(), None);
    assert!(backend.blob_ids().unwrap().is_empty());
}

#[test]
fn durable_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = durable(&dir, "default");
        storage::set(backend.as_ref(), "sections", &json!({"Work": []})).unwrap();
    }
    let reopened = durable(&dir, "default");
    let loaded: Value = storage::get(reopened.as_ref(), "sections", json!({})).unwrap();
    assert_eq!(loaded, json!({"Work": []}));
}

#[test]
fn selector_prefers_durable_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mut selector = BackendSelector::new(dir.path(), BackendPreference::Auto);

    let backend = selector.open("default").unwrap();

    assert_eq!(backend.kind(), BackendKind::Durable);
    assert!(!selector.is_degraded());
    assert!(durable_store_path(dir.path(), "default").exists());
}

#[test]
fn selector_falls_back_and_stays_fallen_back() {
    let dir = tempfile::tempdir().unwrap();
    block_durable_engine(dir.path());
    let mut selector = BackendSelector::new(dir.path(), BackendPreference::Auto);

    let first = selector.open("default").unwrap();
    assert_eq!(first.kind(), BackendKind::Fallback);
    assert!(selector.is_degraded());

    // Unblocking mid-session must not upgrade the engine.
    std::fs::remove_file(dir.path().join("notebooks")).unwrap();
    let second = selector.open("other").unwrap();
    assert_eq!(second.kind(), BackendKind::Fallback);
    assert!(!dir.path().join("notebooks").exists());
}

#[test]
fn selector_honors_forced_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let mut selector = BackendSelector::new(dir.path(), BackendPreference::Fallback);

    let backend = selector.open("default").unwrap();

    assert_eq!(backend.kind(), BackendKind::Fallback);
    assert_eq!(backend.namespace(), "default");
}

#[test]
fn corrupted_flat_store_is_reported_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = flat_store_path(dir.path());
    std::fs::write(&path, b"{not json").unwrap();
    let backend = FlatBackend::new(FlatStore::open(&path).unwrap(), "default");

    let read = storage::get::<Value>(&backend, "sections", json!({}));
    assert!(matches!(read, Err(StorageError::Corrupted(_))));
    assert!(storage::set(&backend, "sections", &json!({})).is_err());
    assert_eq!(std::fs::read(&path).unwrap(), b"{not json");
}
