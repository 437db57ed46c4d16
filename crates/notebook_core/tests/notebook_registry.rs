use notebook_core::storage::flat_store_path;
use notebook_core::{FlatStore, NotebookEntry, NotebookRegistry, RegistryError, DEFAULT_NOTEBOOK};

fn registry(dir: &tempfile::TempDir) -> NotebookRegistry {
    NotebookRegistry::new(FlatStore::open(flat_store_path(dir.path())).unwrap())
}

#[test]
fn names_are_listed_in_creation_order() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);

    registry.create("Work").unwrap();
    registry.create("Home").unwrap();

    assert_eq!(registry.list().unwrap(), vec!["Work", "Home"]);
}

#[test]
fn duplicate_name_is_rejected_and_list_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);
    registry.create("Work").unwrap();

    let err = registry.create("Work").unwrap_err();

    assert!(matches!(err, RegistryError::AlreadyExists(name) if name == "Work"));
    assert_eq!(registry.list().unwrap(), vec!["Work"]);
}

#[test]
fn names_differing_only_in_case_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);
    registry.create("Work").unwrap();

    assert!(matches!(
        registry.create("work"),
        Err(RegistryError::AlreadyExists(_))
    ));
    assert_eq!(registry.list().unwrap(), vec!["Work"]);
}

#[test]
fn switch_to_unknown_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);

    assert!(matches!(
        registry.switch_to("Ghost"),
        Err(RegistryError::NotFound(_))
    ));
}

#[test]
fn entries_flag_the_active_notebook() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);
    assert_eq!(registry.current().unwrap(), DEFAULT_NOTEBOOK);
    registry.create("Work").unwrap();
    registry.switch_to("Work").unwrap();

    assert_eq!(
        registry.entries().unwrap(),
        vec![
            NotebookEntry {
                name: DEFAULT_NOTEBOOK.to_string(),
                is_current: false,
            },
            NotebookEntry {
                name: "Work".to_string(),
                is_current: true,
            },
        ]
    );
}

#[test]
fn registry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let registry = registry(&dir);
        registry.create("Work").unwrap();
        registry.switch_to("Work").unwrap();
    }

    let reopened = registry(&dir);
    assert_eq!(reopened.current().unwrap(), "Work");
}

#[test]
fn unreadable_notebook_list_is_reported_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlatStore::open(flat_store_path(dir.path())).unwrap();
    store.set("notebooks", "not json").unwrap();
    let registry = NotebookRegistry::new(store.clone());

    let err = registry.list().unwrap_err();
    assert!(err.is_unreadable());
    assert!(registry.create("Work").unwrap_err().is_unreadable());
    assert!(registry.current().unwrap_err().is_unreadable());
    assert_eq!(store.get("notebooks").unwrap().as_deref(), Some("not json"));
}

#[test]
fn corrupted_flat_store_is_reported_as_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = flat_store_path(dir.path());
    std::fs::write(&path, "{trunc").unwrap();
    let registry = NotebookRegistry::new(FlatStore::open(&path).unwrap());

    assert!(registry.current().unwrap_err().is_unreadable());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{trunc");
}
