//! Application root wiring registry, backend selection and the session.
//!
//! # Responsibility
//! - Own the single `BackendSelector` of the process session.
//! - Open the active notebook at start and reopen on switch.
//!
//! # Invariants
//! - Exactly one notebook session is live; switching tears the old one down.
//! - The shared session handle stays the same across switches, so an
//!   autosave worker keeps following the active notebook.
//! - A damaged registry never stops startup: the default notebook opens
//!   and the stored registry data is left as found.

use crate::autosave::Autosaver;
use crate::config::{ConfigError, CoreConfig};
use crate::registry::{NotebookEntry, NotebookRegistry, RegistryError, DEFAULT_NOTEBOOK};
use crate::session::{NotebookSession, SessionError, SharedSession};
use crate::storage::{flat_store_path, BackendSelector, FlatStore, StorageError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::MutexGuard;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Registry(RegistryError),
    Session(SessionError),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Session(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Session(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<RegistryError> for AppError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        Self::Session(SessionError::Storage(value))
    }
}

/// Root object owning everything the persistence core needs.
pub struct NotebookApp {
    config: CoreConfig,
    selector: BackendSelector,
    registry: NotebookRegistry,
    registry_unreadable: bool,
    session: SharedSession,
}

impl NotebookApp {
    /// Validates config, resolves the active notebook and opens it.
    pub fn start(config: CoreConfig) -> AppResult<Self> {
        config.validate()?;
        let registry = NotebookRegistry::new(FlatStore::open(flat_store_path(&config.data_dir))?);
        let mut selector = BackendSelector::new(config.data_dir.clone(), config.backend_preference());

        let (current, registry_unreadable) = match registry.current() {
            Ok(current) => (current, false),
            Err(err) if err.is_unreadable() => {
                warn!(
                    "event=app_start module=app status=degraded reason=registry_unreadable error={err}"
                );
                (DEFAULT_NOTEBOOK.to_string(), true)
            }
            Err(err) => return Err(err.into()),
        };
        let session = NotebookSession::open(&mut selector, &current)?;
        info!(
            "event=app_start module=app status=ok backend={} degraded={}",
            session.backend_kind().as_str(),
            selector.is_degraded()
        );

        Ok(Self {
            config,
            selector,
            registry,
            registry_unreadable,
            session: SharedSession::new(session),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &NotebookRegistry {
        &self.registry
    }

    /// Whether the durable engine was unavailable this session.
    pub fn is_degraded(&self) -> bool {
        self.selector.is_degraded()
    }

    /// Whether startup found the notebook registry damaged.
    ///
    /// Registry operations keep failing until the stored data is repaired;
    /// the default notebook stays usable meanwhile.
    pub fn is_registry_unreadable(&self) -> bool {
        self.registry_unreadable
    }

    /// Handle shared with background workers.
    pub fn shared_session(&self) -> SharedSession {
        self.session.clone()
    }

    pub fn session(&self) -> MutexGuard<'_, NotebookSession> {
        self.session.lock()
    }

    /// Starts the autosave worker at the configured interval.
    pub fn start_autosave(&self) -> std::io::Result<Autosaver> {
        Autosaver::spawn(self.shared_session(), self.config.autosave_interval())
    }

    pub fn notebooks(&self) -> AppResult<Vec<NotebookEntry>> {
        Ok(self.registry.entries()?)
    }

    pub fn create_notebook(&self, name: &str) -> AppResult<()> {
        Ok(self.registry.create(name)?)
    }

    /// Activates `name` and reloads the session under its namespace.
    ///
    /// The registry is only updated once the new session has loaded.
    pub fn switch_to(&mut self, name: &str) -> AppResult<()> {
        if !self.registry.list()?.iter().any(|existing| existing == name) {
            return Err(RegistryError::NotFound(name.to_string()).into());
        }
        let session = NotebookSession::open(&mut self.selector, name)?;
        self.registry.switch_to(name)?;
        drop(self.session.replace(session));
        Ok(())
    }
}
