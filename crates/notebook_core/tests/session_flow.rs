mod common;

use common::FlakyBackend;
use notebook_core::{Autosaver, NotebookSession, SessionError, SharedSession};
use serde_json::json;
use std::time::Duration;

fn session_with_page() -> (NotebookSession, String) {
    let backend = notebook_core::SqliteBackend::open_in_memory("default").unwrap();
    let mut session = NotebookSession::load(Box::new(backend)).unwrap();
    session.create_section("Work").unwrap();
    let page = session.create_page("Work", "Plan").unwrap();
    (session, page.id)
}

#[test]
fn failed_save_keeps_stored_value_and_reverts_modified() {
    let (backend, faults) = FlakyBackend::new("default");
    let mut session = NotebookSession::load(Box::new(backend)).unwrap();
    session.create_section("Work").unwrap();
    let page = session.create_page("Work", "Plan").unwrap();
    session.save_page("Work", &page.id, "kept").unwrap();
    let before = session.page("Work", &page.id).unwrap().modified;
    let stored_before = session.get_document("sections", json!({})).unwrap();

    faults.fail_all();
    std::thread::sleep(Duration::from_millis(2));
    let err = session.save_page("Work", &page.id, "lost").unwrap_err();

    assert!(matches!(err, SessionError::Storage(_)));
    assert_eq!(session.get_document("sections", json!({})).unwrap(), stored_before);
    let page_now = session.page("Work", &page.id).unwrap();
    assert_eq!(page_now.modified, before);
    assert_eq!(page_now.markdown, "lost");

    faults.clear();
    session.save_page("Work", &page.id, "lost").unwrap();
    let stored = session.get_document("sections", json!({})).unwrap();
    assert_eq!(stored["Work"]["pages"][0]["markdown"], json!("lost"));
    let contents: Vec<String> = session
        .history(&page.id)
        .into_iter()
        .map(|entry| entry.markdown)
        .collect();
    assert_eq!(contents, vec!["", "kept"]);
}

#[test]
fn failed_sections_write_leaves_stored_history_untouched() {
    let (backend, faults) = FlakyBackend::new("default");
    let mut session = NotebookSession::load(Box::new(backend)).unwrap();
    session.create_section("Work").unwrap();
    let page = session.create_page("Work", "Plan").unwrap();
    session.save_page("Work", &page.id, "v1").unwrap();

    faults.fail_document("sections");
    assert!(session.save_page("Work", &page.id, "v2").is_err());
    faults.clear();
    session.reload().unwrap();

    assert_eq!(session.page("Work", &page.id).unwrap().markdown, "v1");
    let contents: Vec<String> = session
        .history(&page.id)
        .into_iter()
        .map(|entry| entry.markdown)
        .collect();
    assert_eq!(contents, vec![""]);
}

#[test]
fn retried_save_records_the_stored_content_once() {
    let (backend, faults) = FlakyBackend::new("default");
    let mut session = NotebookSession::load(Box::new(backend)).unwrap();
    session.create_section("Work").unwrap();
    let page = session.create_page("Work", "Plan").unwrap();
    session.save_page("Work", &page.id, "v1").unwrap();

    faults.fail_document("sections");
    assert!(session.save_page("Work", &page.id, "v2").is_err());
    let stored = session.get_document("history", json!({})).unwrap();
    assert_eq!(stored[page.id.as_str()].as_array().unwrap().len(), 1);

    faults.clear();
    session.save_page("Work", &page.id, "v2").unwrap();

    let stored = session.get_document("history", json!({})).unwrap();
    let markdowns: Vec<&str> = stored[page.id.as_str()]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["markdown"].as_str().unwrap())
        .collect();
    assert_eq!(markdowns, vec!["", "v1"]);
}

#[test]
fn failed_attachment_write_leaves_no_metadata() {
    let (backend, faults) = FlakyBackend::new("default");
    let mut session = NotebookSession::load(Box::new(backend)).unwrap();
    faults.fail_all();

    assert!(session.add_attachment("a.png", "image/png", b"px").is_err());
    assert_eq!(session.attachments().count(), 0);
}

#[test]
fn unknown_section_or_page_is_reported() {
    let (mut session, page_id) = session_with_page();

    assert!(matches!(
        session.save_page("Nope", &page_id, "x"),
        Err(SessionError::SectionNotFound(_))
    ));
    assert!(matches!(
        session.save_page("Work", "missing", "x"),
        Err(SessionError::PageNotFound(_))
    ));
    assert!(matches!(
        session.create_section("Work"),
        Err(SessionError::SectionExists(_))
    ));
}

#[test]
fn save_bumps_modified_but_not_created() {
    let (mut session, page_id) = session_with_page();
    let created = session.page("Work", &page_id).unwrap().created;
    std::thread::sleep(Duration::from_millis(2));

    let saved = session.save_page("Work", &page_id, "# Plan").unwrap();

    assert_eq!(saved.created, created);
    assert!(saved.modified > created);
}

#[test]
fn page_rename_and_section_style_persist() {
    let (mut session, page_id) = session_with_page();

    session.rename_page("Work", &page_id, "Roadmap").unwrap();
    session.set_section_style("Work", "#0af", "star").unwrap();

    let stored = session.get_document("sections", json!({})).unwrap();
    assert_eq!(stored["Work"]["color"], json!("#0af"));
    assert_eq!(stored["Work"]["icon"], json!("star"));
    assert_eq!(stored["Work"]["pages"][0]["name"], json!("Roadmap"));
}

#[test]
fn templates_are_unique_by_name() {
    let (mut session, _) = session_with_page();

    session.save_template("Daily", "# Today").unwrap();
    assert!(matches!(
        session.save_template("Daily", "# Again"),
        Err(SessionError::TemplateExists(_))
    ));
    assert_eq!(
        session.get_document("templates", json!([])).unwrap(),
        json!([{"name": "Daily", "markdown": "# Today"}])
    );

    session.delete_template("Daily").unwrap();
    assert!(session.templates().is_empty());
}

#[test]
fn raw_documents_can_be_imported_and_reloaded() {
    let (mut session, _) = session_with_page();
    session
        .set_document("sections", &json!({"Imported": [{"name": "Note"}]}))
        .unwrap();

    session.reload().unwrap();

    assert!(session.section("Imported").is_some());
    assert!(session.section("Work").is_none());
    assert!(session.document_keys().unwrap().contains(&"sections".to_string()));
}

#[test]
fn autosave_saves_only_changed_drafts() {
    let (mut session, page_id) = session_with_page();
    assert!(!session.autosave().unwrap());
    assert!(matches!(
        session.update_draft("x"),
        Err(SessionError::NoOpenPage)
    ));

    session.open_page("Work", &page_id).unwrap();
    session.update_draft("draft one").unwrap();
    assert!(session.autosave().unwrap());
    assert!(!session.autosave().unwrap());
    assert_eq!(session.page("Work", &page_id).unwrap().markdown, "draft one");

    session.close_page();
    assert!(!session.autosave().unwrap());
}

#[test]
fn concurrent_autosaves_serialize_on_the_session() {
    let (mut session, page_id) = session_with_page();
    session.open_page("Work", &page_id).unwrap();
    let shared = SharedSession::new(session);

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                shared.lock().update_draft(format!("draft {n}")).unwrap();
                shared.autosave().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let session = shared.lock();
    let markdown = session.page("Work", &page_id).unwrap().markdown.clone();
    assert!(markdown.starts_with("draft "));
    let stored = session.get_document("sections", json!({})).unwrap();
    assert_eq!(stored["Work"]["pages"][0]["markdown"], json!(markdown));
    assert!(session.history(&page_id).len() <= 4);
}

#[test]
fn autosaver_flushes_open_draft_and_stops() {
    let (mut session, page_id) = session_with_page();
    session.open_page("Work", &page_id).unwrap();
    session.update_draft("typed").unwrap();
    let shared = SharedSession::new(session);

    let mut autosaver = Autosaver::spawn(shared.clone(), Duration::from_millis(10)).unwrap();
    let mut saved = false;
    for _ in 0..200 {
        if shared.lock().page("Work", &page_id).unwrap().markdown == "typed" {
            saved = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    autosaver.stop();

    assert!(saved);
    let stored = shared.lock().get_document("sections", json!({})).unwrap();
    assert_eq!(stored["Work"]["pages"][0]["markdown"], json!("typed"));
}
