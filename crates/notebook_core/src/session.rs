//! Notebook session: the backend handle plus the in-memory mirror.
//!
//! # Responsibility
//! - Load the four notebook documents, normalize them and migrate legacy
//!   attachments exactly once per load.
//! - Offer use-case mutations that update the mirror and then flush the
//!   affected documents explicitly.
//!
//! # Invariants
//! - The mirror is the single writable copy; nothing is persisted implicitly.
//! - A failed flush is returned to the caller; the edit stays in the mirror.
//! - `Page::modified` only moves on a save whose flush succeeded.
//! - Stored history only gains an entry after the stored page moved past it.
//! - A document that could not be decoded is never overwritten by a flush;
//!   only an explicit `set_document` replaces it.

use crate::attachment::{
    AttachmentCatalog, AttachmentStore, LegacyMigrationReport, StoredAttachment,
};
use crate::history::{VersionEntry, VersionHistory};
use crate::model::attachment::AttachmentMeta;
use crate::model::now_ms;
use crate::model::section::{Page, Section, SectionMap};
use crate::model::template::Template;
use crate::schema::{migrate_sections, SchemaReport};
use crate::storage::{self, BackendKind, BackendSelector, StorageBackend, StorageError};
use log::{error, info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

/// Document holding the `name -> section` map.
pub const SECTIONS_DOC: &str = "sections";
/// Document holding attachment metadata.
pub const ATTACHMENTS_DOC: &str = "attachments";
/// Document holding page templates.
pub const TEMPLATES_DOC: &str = "templates";
/// Document holding per-page version history.
pub const HISTORY_DOC: &str = "history";

pub type SessionResult<T> = Result<T, SessionError>;

/// Session use-case error.
#[derive(Debug)]
pub enum SessionError {
    /// Backend read or write failed.
    Storage(StorageError),
    InvalidName(String),
    SectionExists(String),
    SectionNotFound(String),
    PageNotFound(String),
    TemplateExists(String),
    TemplateNotFound(String),
    AttachmentNotFound(String),
    /// The stored document could not be decoded and is kept as is.
    DocumentUnreadable(String),
    /// Draft/autosave call without an open page.
    NoOpenPage,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(err) => write!(f, "{err}"),
            Self::InvalidName(name) => write!(f, "invalid name: `{name}`"),
            Self::SectionExists(name) => write!(f, "section already exists: `{name}`"),
            Self::SectionNotFound(name) => write!(f, "section not found: `{name}`"),
            Self::PageNotFound(id) => write!(f, "page not found: {id}"),
            Self::TemplateExists(name) => write!(f, "template already exists: `{name}`"),
            Self::TemplateNotFound(name) => write!(f, "template not found: `{name}`"),
            Self::AttachmentNotFound(id) => write!(f, "attachment not found: {id}"),
            Self::DocumentUnreadable(key) => {
                write!(f, "stored `{key}` document is unreadable; refusing to overwrite it")
            }
            Self::NoOpenPage => write!(f, "no page is open"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// What happened while loading the notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub schema: SchemaReport,
    pub attachments: LegacyMigrationReport,
    /// Documents kept untouched because they could not be decoded.
    pub unreadable_documents: Vec<String>,
}

#[derive(Debug, Clone)]
struct OpenPage {
    section: String,
    page_id: String,
    draft: Option<String>,
}

/// Explicit per-notebook context object.
pub struct NotebookSession {
    backend: Box<dyn StorageBackend>,
    sections: SectionMap,
    attachments: AttachmentCatalog,
    templates: Vec<Template>,
    history: VersionHistory,
    /// In-memory history holds entries the stored one does not have yet.
    history_dirty: bool,
    unreadable: BTreeSet<String>,
    open_page: Option<OpenPage>,
    load_report: LoadReport,
}

impl NotebookSession {
    /// Opens `notebook` through `selector` and loads it.
    pub fn open(selector: &mut BackendSelector, notebook: &str) -> SessionResult<Self> {
        let backend = selector.open(notebook)?;
        Self::load(backend)
    }

    /// Loads the notebook behind an already opened backend.
    ///
    /// # Errors
    /// - Only when the backend cannot be read at all. Unreadable document
    ///   contents are logged and treated as empty.
    pub fn load(backend: Box<dyn StorageBackend>) -> SessionResult<Self> {
        let mut session = Self {
            backend,
            sections: SectionMap::new(),
            attachments: AttachmentCatalog::default(),
            templates: Vec::new(),
            history: VersionHistory::new(),
            history_dirty: false,
            unreadable: BTreeSet::new(),
            open_page: None,
            load_report: LoadReport::default(),
        };
        session.reload()?;
        Ok(session)
    }

    /// Re-reads every document from the backend, discarding the mirror.
    ///
    /// Used after an import wrote documents through [`Self::set_document`].
    pub fn reload(&mut self) -> SessionResult<()> {
        let mut unreadable = BTreeSet::new();
        let sections_doc = self.read_document(SECTIONS_DOC, &mut unreadable)?;
        let attachments_doc = self.read_document(ATTACHMENTS_DOC, &mut unreadable)?;
        let templates_doc = self.read_document(TEMPLATES_DOC, &mut unreadable)?;
        let history_doc = self.read_document(HISTORY_DOC, &mut unreadable)?;

        let (sections, schema) = migrate_sections(sections_doc, now_ms());
        if schema.document_unreadable {
            unreadable.insert(SECTIONS_DOC.to_string());
        }
        let attachments = AttachmentCatalog::from_document(attachments_doc).unwrap_or_else(|| {
            unreadable.insert(ATTACHMENTS_DOC.to_string());
            AttachmentCatalog::default()
        });
        let templates = decode_templates(templates_doc).unwrap_or_else(|| {
            unreadable.insert(TEMPLATES_DOC.to_string());
            Vec::new()
        });
        let history = VersionHistory::from_document(history_doc).unwrap_or_else(|| {
            unreadable.insert(HISTORY_DOC.to_string());
            VersionHistory::new()
        });

        self.sections = sections;
        self.attachments = attachments;
        self.templates = templates;
        self.history = history;
        self.history_dirty = false;
        self.unreadable = unreadable;
        self.open_page = None;

        if schema.changed() {
            self.flush_during_load(SECTIONS_DOC, &self.sections.to_document());
        }
        let attachments = self.migrate_legacy_attachments();

        info!(
            "event=notebook_load module=session status=ok backend={} sections={} attachments={} templates={} unreadable_sections={} unreadable_documents={}",
            self.backend.kind().as_str(),
            self.sections.len(),
            self.attachments.metas().count(),
            self.templates.len(),
            schema.skipped.len(),
            self.unreadable.len()
        );
        self.load_report = LoadReport {
            schema,
            attachments,
            unreadable_documents: self.unreadable.iter().cloned().collect(),
        };
        Ok(())
    }

    /// Moves inline attachment payloads into blobs and persists the catalog.
    ///
    /// When the catalog cannot be persisted the new blobs are removed again
    /// and the entries stay inline, so the next load starts from the same
    /// state instead of minting a second set of blobs.
    fn migrate_legacy_attachments(&mut self) -> LegacyMigrationReport {
        let before = self.attachments.clone();
        let mut report =
            AttachmentStore::new(self.backend.as_ref()).migrate_legacy(&mut self.attachments);
        if !report.changed() {
            return report;
        }
        let Err(err) = self.flush(ATTACHMENTS_DOC, &self.attachments.to_document()) else {
            return report;
        };

        let store = AttachmentStore::new(self.backend.as_ref());
        for (old, new) in before.entries().iter().zip(self.attachments.entries()) {
            if let (StoredAttachment::Inline(_), StoredAttachment::Reference(meta)) = (old, new) {
                if let Err(cleanup) = store.delete_blob(&meta.id) {
                    warn!(
                        "event=attachment_migrate module=session status=error step=cleanup error={cleanup}"
                    );
                }
            }
        }
        warn!(
            "event=attachment_migrate module=session status=rolled_back migrated={} error={err}",
            report.migrated
        );
        self.attachments = before;
        report.retained += report.migrated;
        report.migrated = 0;
        report
    }

    pub fn notebook(&self) -> &str {
        self.backend.namespace()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Documents that failed to decode on the last load.
    pub fn unreadable_documents(&self) -> impl Iterator<Item = &str> {
        self.unreadable.iter().map(String::as_str)
    }

    // --- Sections and pages ---

    pub fn sections(&self) -> &SectionMap {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.section(name)
    }

    pub fn page(&self, section: &str, page_id: &str) -> Option<&Page> {
        self.sections.section(section)?.page(page_id)
    }

    pub fn create_section(&mut self, name: &str) -> SessionResult<()> {
        self.ensure_writable(SECTIONS_DOC)?;
        if name.trim().is_empty() {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        if self.sections.contains(name) {
            return Err(SessionError::SectionExists(name.to_string()));
        }
        self.sections.push(Section::new(name));
        self.flush_sections()
    }

    pub fn set_section_style(&mut self, name: &str, color: &str, icon: &str) -> SessionResult<()> {
        self.ensure_writable(SECTIONS_DOC)?;
        let section = self.section_mut(name)?;
        section.color = color.to_string();
        section.icon = icon.to_string();
        self.flush_sections()
    }

    /// Appends a new empty page with `created == modified`.
    pub fn create_page(&mut self, section: &str, name: &str) -> SessionResult<Page> {
        self.ensure_writable(SECTIONS_DOC)?;
        let page = Page::new(name);
        self.section_mut(section)?.pages.push(page.clone());
        self.flush_sections()?;
        Ok(page)
    }

    pub fn rename_page(&mut self, section: &str, page_id: &str, name: &str) -> SessionResult<()> {
        self.ensure_writable(SECTIONS_DOC)?;
        self.page_mut(section, page_id)?.name = name.to_string();
        self.flush_sections()
    }

    /// Replaces a page's markdown and persists it.
    ///
    /// `sections` is written first; the previous markdown only reaches the
    /// stored history once the stored page has moved past it. On a failed
    /// `sections` write the new markdown stays in the mirror, `modified` is
    /// restored and the error is returned. An unreadable history document
    /// is left alone and the save proceeds without recording history.
    pub fn save_page(
        &mut self,
        section: &str,
        page_id: &str,
        markdown: impl Into<String>,
    ) -> SessionResult<Page> {
        self.ensure_writable(SECTIONS_DOC)?;
        let record_history = !self.unreadable.contains(HISTORY_DOC);
        let markdown = markdown.into();
        let now = now_ms();

        let page = self.page_mut(section, page_id)?;
        let previous_modified = page.modified;
        let prior = if page.markdown == markdown {
            None
        } else {
            Some(std::mem::replace(&mut page.markdown, markdown))
        };
        page.modified = now.max(page.created);
        let saved = page.clone();

        if let Some(prior) = prior.filter(|_| record_history) {
            self.history.append(page_id, now, prior);
            self.history_dirty = true;
        }

        if let Err(err) = self.flush_sections() {
            if let Ok(page) = self.page_mut(section, page_id) {
                page.modified = previous_modified;
            }
            return Err(err);
        }
        if self.history_dirty {
            self.persist_history()?;
        }

        if let Some(open) = self.open_page.as_mut() {
            if open.page_id == page_id && open.draft.as_deref() == Some(saved.markdown.as_str()) {
                open.draft = None;
            }
        }
        Ok(saved)
    }

    /// Removes a page together with its history.
    pub fn delete_page(&mut self, section: &str, page_id: &str) -> SessionResult<Page> {
        self.ensure_writable(SECTIONS_DOC)?;
        let pages = &mut self.section_mut(section)?.pages;
        let index = pages
            .iter()
            .position(|page| page.id == page_id)
            .ok_or_else(|| SessionError::PageNotFound(page_id.to_string()))?;
        let removed = pages.remove(index);

        if self
            .open_page
            .as_ref()
            .is_some_and(|open| open.page_id == page_id)
        {
            self.open_page = None;
        }
        if !self.unreadable.contains(HISTORY_DOC) && self.history.remove(page_id) {
            self.history_dirty = true;
        }
        self.flush_sections()?;
        if self.history_dirty {
            self.persist_history()?;
        }
        Ok(removed)
    }

    /// Prior versions of a page, oldest first.
    pub fn history(&self, page_id: &str) -> Vec<VersionEntry> {
        self.history.list(page_id)
    }

    // --- Templates ---

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn save_template(&mut self, name: &str, markdown: &str) -> SessionResult<()> {
        self.ensure_writable(TEMPLATES_DOC)?;
        if name.trim().is_empty() {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        if self.templates.iter().any(|template| template.name == name) {
            return Err(SessionError::TemplateExists(name.to_string()));
        }
        self.templates.push(Template {
            name: name.to_string(),
            markdown: markdown.to_string(),
        });
        self.flush_templates()
    }

    pub fn delete_template(&mut self, name: &str) -> SessionResult<Template> {
        self.ensure_writable(TEMPLATES_DOC)?;
        let index = self
            .templates
            .iter()
            .position(|template| template.name == name)
            .ok_or_else(|| SessionError::TemplateNotFound(name.to_string()))?;
        let removed = self.templates.remove(index);
        self.flush_templates()?;
        Ok(removed)
    }

    // --- Attachments ---

    pub fn attachments(&self) -> impl Iterator<Item = &AttachmentMeta> {
        self.attachments.metas()
    }

    pub fn attachment_store(&self) -> AttachmentStore<'_> {
        AttachmentStore::new(self.backend.as_ref())
    }

    /// Stores bytes and registers their metadata.
    ///
    /// Returns `Ok(None)` when the active engine cannot hold blobs.
    pub fn add_attachment(
        &mut self,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> SessionResult<Option<AttachmentMeta>> {
        self.ensure_writable(ATTACHMENTS_DOC)?;
        let store = AttachmentStore::new(self.backend.as_ref());
        if !store.is_supported() {
            warn!(
                "event=attachment_add module=session status=skipped reason=blobs_unsupported size={}",
                bytes.len()
            );
            return Ok(None);
        }
        let meta = store.store_new(name, mime_type, bytes)?;

        self.attachments.push(meta.clone());
        if let Err(err) = self.flush_attachments() {
            self.attachments.remove(&meta.id);
            if let Err(cleanup) = self.attachment_store().delete_blob(&meta.id) {
                warn!("event=attachment_add module=session status=error step=cleanup error={cleanup}");
            }
            return Err(err);
        }
        Ok(Some(meta))
    }

    /// Bytes of an attachment; `None` when unknown or unsupported.
    pub fn attachment_bytes(&self, id: &str) -> SessionResult<Option<Vec<u8>>> {
        Ok(self.attachment_store().get_blob(id)?)
    }

    pub fn remove_attachment(&mut self, id: &str) -> SessionResult<AttachmentMeta> {
        self.ensure_writable(ATTACHMENTS_DOC)?;
        let meta = self
            .attachments
            .remove(id)
            .ok_or_else(|| SessionError::AttachmentNotFound(id.to_string()))?;
        self.flush_attachments()?;
        self.attachment_store().delete_blob(id)?;
        Ok(meta)
    }

    // --- Raw primitives for import/export ---

    pub fn document_keys(&self) -> SessionResult<Vec<String>> {
        Ok(self.backend.document_keys()?)
    }

    pub fn get_document(&self, key: &str, default: Value) -> SessionResult<Value> {
        Ok(storage::get(self.backend.as_ref(), key, default)?)
    }

    /// Writes a raw document; call [`Self::reload`] afterwards to refresh the mirror.
    pub fn set_document(&self, key: &str, value: &Value) -> SessionResult<()> {
        Ok(storage::set(self.backend.as_ref(), key, value)?)
    }

    pub fn blob_ids(&self) -> SessionResult<Vec<String>> {
        Ok(self.backend.blob_ids()?)
    }

    pub fn get_blob(&self, id: &str) -> SessionResult<Option<Vec<u8>>> {
        Ok(self.attachment_store().get_blob(id)?)
    }

    pub fn put_blob(&self, id: &str, bytes: &[u8]) -> SessionResult<()> {
        Ok(self.attachment_store().put_blob(id, bytes)?)
    }

    // --- Open page and autosave ---

    /// Marks the page the editor currently shows.
    pub fn open_page(&mut self, section: &str, page_id: &str) -> SessionResult<()> {
        self.page_mut(section, page_id)?;
        self.open_page = Some(OpenPage {
            section: section.to_string(),
            page_id: page_id.to_string(),
            draft: None,
        });
        Ok(())
    }

    pub fn close_page(&mut self) {
        self.open_page = None;
    }

    /// Records unsaved editor content for the open page.
    pub fn update_draft(&mut self, markdown: impl Into<String>) -> SessionResult<()> {
        let open = self.open_page.as_mut().ok_or(SessionError::NoOpenPage)?;
        open.draft = Some(markdown.into());
        Ok(())
    }

    /// Saves the open page when its draft differs from the stored markdown.
    ///
    /// Returns whether a save happened.
    pub fn autosave(&mut self) -> SessionResult<bool> {
        let Some(open) = self.open_page.clone() else {
            return Ok(false);
        };
        let Some(draft) = open.draft else {
            return Ok(false);
        };
        let current = self.page_mut(&open.section, &open.page_id)?;
        if current.markdown == draft {
            if let Some(open) = self.open_page.as_mut() {
                open.draft = None;
            }
            return Ok(false);
        }
        self.save_page(&open.section, &open.page_id, draft)?;
        Ok(true)
    }

    /// Rewrites every readable document from the mirror.
    pub fn flush_all(&mut self) -> SessionResult<()> {
        for key in [SECTIONS_DOC, ATTACHMENTS_DOC, TEMPLATES_DOC, HISTORY_DOC] {
            if self.unreadable.contains(key) {
                continue;
            }
            match key {
                SECTIONS_DOC => self.flush_sections()?,
                ATTACHMENTS_DOC => self.flush_attachments()?,
                TEMPLATES_DOC => self.flush_templates()?,
                _ => self.persist_history()?,
            }
        }
        Ok(())
    }

    // --- Internals ---

    fn section_mut(&mut self, name: &str) -> SessionResult<&mut Section> {
        self.sections
            .section_mut(name)
            .ok_or_else(|| SessionError::SectionNotFound(name.to_string()))
    }

    fn page_mut(&mut self, section: &str, page_id: &str) -> SessionResult<&mut Page> {
        self.section_mut(section)?
            .page_mut(page_id)
            .ok_or_else(|| SessionError::PageNotFound(page_id.to_string()))
    }

    fn ensure_writable(&self, key: &str) -> SessionResult<()> {
        if self.unreadable.contains(key) {
            return Err(SessionError::DocumentUnreadable(key.to_string()));
        }
        Ok(())
    }

    /// Reads a document; undecodable JSON reads as null and marks `key`.
    fn read_document(&self, key: &str, unreadable: &mut BTreeSet<String>) -> SessionResult<Value> {
        let Some(text) = self.backend.read_document(key)? else {
            return Ok(Value::Null);
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    "event=document_load module=session status=skipped document={key} error={err}"
                );
                unreadable.insert(key.to_string());
                Ok(Value::Null)
            }
        }
    }

    fn flush_sections(&self) -> SessionResult<()> {
        self.flush(SECTIONS_DOC, &self.sections.to_document())
    }

    fn flush_attachments(&self) -> SessionResult<()> {
        self.flush(ATTACHMENTS_DOC, &self.attachments.to_document())
    }

    fn flush_templates(&self) -> SessionResult<()> {
        let document = serde_json::to_value(&self.templates)
            .map_err(|err| SessionError::Storage(err.into()))?;
        self.flush(TEMPLATES_DOC, &document)
    }

    fn persist_history(&mut self) -> SessionResult<()> {
        self.flush(HISTORY_DOC, &self.history.to_document())?;
        self.history_dirty = false;
        Ok(())
    }

    fn flush(&self, key: &str, document: &Value) -> SessionResult<()> {
        if self.unreadable.contains(key) {
            warn!("event=document_flush module=session status=skipped document={key} reason=unreadable");
            return Err(SessionError::DocumentUnreadable(key.to_string()));
        }
        storage::set(self.backend.as_ref(), key, document).map_err(|err| {
            error!(
                "event=document_flush module=session status=error document={key} backend={} error={err}",
                self.backend.kind().as_str()
            );
            SessionError::Storage(err)
        })
    }

    fn flush_during_load(&self, key: &str, document: &Value) {
        // Normalized data stays in the mirror; the next explicit write retries.
        let _ = self.flush(key, document);
    }
}

/// Decodes the `templates` document; `None` when its shape is not understood.
fn decode_templates(document: Value) -> Option<Vec<Template>> {
    let decoded = match document {
        Value::Null => return Some(Vec::new()),
        // Some releases stored templates as `name -> markdown`.
        Value::Object(entries) => entries
            .into_iter()
            .map(|(name, markdown)| match markdown {
                Value::String(markdown) => Some(Template { name, markdown }),
                _ => None,
            })
            .collect::<Option<Vec<_>>>(),
        other => serde_json::from_value(other).ok(),
    };
    if decoded.is_none() {
        warn!("event=templates_load module=session status=skipped reason=unsupported_shape");
    }
    decoded
}

/// Session behind the single-writer guard shared with the autosave worker.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<NotebookSession>>,
}

impl SharedSession {
    pub fn new(session: NotebookSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Locks the session; callers queue behind any in-flight write.
    pub fn lock(&self) -> MutexGuard<'_, NotebookSession> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swaps in a freshly opened session, dropping the previous backend.
    pub fn replace(&self, session: NotebookSession) -> NotebookSession {
        std::mem::replace(&mut *self.lock(), session)
    }

    pub fn autosave(&self) -> SessionResult<bool> {
        self.lock().autosave()
    }
}
