//! Registry of known notebooks and the active one.
//!
//! # Responsibility
//! - Persist notebook names and the active name under two global keys of
//!   the flat store, readable before any notebook backend is opened.
//!
//! # Invariants
//! - Names are unique ignoring ASCII case and never removed, so two
//!   notebooks never share a storage file on case-insensitive filesystems.
//! - The active name, when set, is always one of the listed names.
//! - A stored list that cannot be decoded is reported, never rewritten.

use crate::storage::{FlatStore, StorageError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Global key holding the JSON list of notebook names.
pub const NOTEBOOKS_KEY: &str = "notebooks";
/// Global key holding the active notebook name.
pub const CURRENT_NOTEBOOK_KEY: &str = "current_notebook";
/// Notebook created on first use.
pub const DEFAULT_NOTEBOOK: &str = "default";

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug)]
pub enum RegistryError {
    /// Name is empty or whitespace only.
    InvalidName(String),
    /// A notebook with the same name, ignoring ASCII case, exists.
    AlreadyExists(String),
    /// No notebook with this name is registered.
    NotFound(String),
    /// The stored notebook list could not be decoded.
    Unreadable(String),
    Storage(StorageError),
}

impl RegistryError {
    /// Whether the stored registry data itself is damaged.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            Self::Unreadable(_) | Self::Storage(StorageError::Corrupted(_))
        )
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid notebook name: `{name}`"),
            Self::AlreadyExists(name) => write!(f, "notebook already exists: `{name}`"),
            Self::NotFound(name) => write!(f, "notebook not found: `{name}`"),
            Self::Unreadable(message) => write!(f, "notebook list is unreadable: {message}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for RegistryError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(value))
    }
}

/// One registered notebook as shown in a picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookEntry {
    pub name: String,
    pub is_current: bool,
}

/// Notebook list persisted in the flat store.
#[derive(Debug, Clone)]
pub struct NotebookRegistry {
    store: FlatStore,
}

impl NotebookRegistry {
    pub fn new(store: FlatStore) -> Self {
        Self { store }
    }

    /// Registered names in creation order.
    ///
    /// # Errors
    /// - `Unreadable` when the stored list is not a JSON list of names.
    pub fn list(&self) -> RegistryResult<Vec<String>> {
        match self.store.get(NOTEBOOKS_KEY)? {
            Some(text) => serde_json::from_str::<Vec<String>>(&text).map_err(|err| {
                warn!("event=registry_load module=registry status=error error={err}");
                RegistryError::Unreadable(err.to_string())
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Names paired with their active flag.
    pub fn entries(&self) -> RegistryResult<Vec<NotebookEntry>> {
        let current = self.store.get(CURRENT_NOTEBOOK_KEY)?;
        Ok(self
            .list()?
            .into_iter()
            .map(|name| NotebookEntry {
                is_current: current.as_deref() == Some(name.as_str()),
                name,
            })
            .collect())
    }

    /// Registers a new notebook name.
    ///
    /// # Errors
    /// - `InvalidName` for blank names.
    /// - `AlreadyExists` when the name is registered, ignoring ASCII case.
    pub fn create(&self, name: &str) -> RegistryResult<()> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        let mut names = self.list()?;
        if names
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(name))
        {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        names.push(name.to_string());
        self.store
            .set(NOTEBOOKS_KEY, &serde_json::to_string(&names)?)?;
        info!(
            "event=notebook_create module=registry status=ok count={}",
            names.len()
        );
        Ok(())
    }

    /// Marks `name` as active; callers reopen storage for it afterwards.
    pub fn switch_to(&self, name: &str) -> RegistryResult<()> {
        if !self.list()?.iter().any(|existing| existing == name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        self.store.set(CURRENT_NOTEBOOK_KEY, name)?;
        info!("event=notebook_switch module=registry status=ok");
        Ok(())
    }

    /// Active notebook; registers and activates [`DEFAULT_NOTEBOOK`] when
    /// nothing valid is active yet.
    pub fn current(&self) -> RegistryResult<String> {
        let names = self.list()?;
        if let Some(current) = self.store.get(CURRENT_NOTEBOOK_KEY)? {
            if names.contains(&current) {
                return Ok(current);
            }
        }

        let fallback = match names.first() {
            Some(first) => first.clone(),
            None => {
                self.create(DEFAULT_NOTEBOOK)?;
                DEFAULT_NOTEBOOK.to_string()
            }
        };
        self.switch_to(&fallback)?;
        Ok(fallback)
    }
}
