//! Persistence core for a local-first notebook application.
//! This crate owns durability: notebook namespaces, storage engines,
//! attachment blobs, schema normalization and version history.

pub mod app;
pub mod attachment;
pub mod autosave;
pub mod config;
pub mod db;
pub mod history;
pub mod logging;
pub mod model;
pub mod registry;
pub mod schema;
pub mod session;
pub mod storage;

pub use app::{AppError, AppResult, NotebookApp};
pub use attachment::{
    decode_inline_payload, AttachmentCatalog, AttachmentStore, LegacyAttachment,
    LegacyMigrationReport, StoredAttachment,
};
pub use autosave::Autosaver;
pub use config::{BackendSetting, ConfigError, CoreConfig};
pub use history::{VersionEntry, VersionHistory, HISTORY_CAP};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::attachment::AttachmentMeta;
pub use model::section::{Page, Section, SectionMap};
pub use model::template::Template;
pub use registry::{NotebookEntry, NotebookRegistry, RegistryError, DEFAULT_NOTEBOOK};
pub use schema::{migrate_sections, SchemaReport, SkipReason};
pub use session::{
    LoadReport, NotebookSession, SessionError, SessionResult, SharedSession, ATTACHMENTS_DOC,
    HISTORY_DOC, SECTIONS_DOC, TEMPLATES_DOC,
};
pub use storage::{
    BackendKind, BackendPreference, BackendSelector, FlatBackend, FlatStore, SqliteBackend,
    StorageBackend, StorageError, StorageResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
