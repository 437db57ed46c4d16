//! Bounded per-page version history.
//!
//! # Responsibility
//! - Keep the most recent prior contents of each page for restore.
//!
//! # Invariants
//! - At most [`HISTORY_CAP`] entries per page; the oldest is evicted first.
//! - Entries are kept oldest-to-newest in append order.
//! - History never mutates pages; restoring is a regular page save.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Maximum retained entries per page.
pub const HISTORY_CAP: usize = 20;

/// One prior state of a page's markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Epoch milliseconds at which this content was replaced.
    pub timestamp: i64,
    pub markdown: String,
}

/// Stored `history` document: page id -> entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionHistory {
    pages: BTreeMap<String, VecDeque<VersionEntry>>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the stored document; `None` when it is not a history map.
    ///
    /// Logs longer than the cap (written by older builds) are trimmed to
    /// their newest entries.
    pub fn from_document(document: Value) -> Option<Self> {
        if document.is_null() {
            return Some(Self::default());
        }
        match serde_json::from_value::<Self>(document) {
            Ok(mut history) => {
                for entries in history.pages.values_mut() {
                    while entries.len() > HISTORY_CAP {
                        entries.pop_front();
                    }
                }
                Some(history)
            }
            Err(err) => {
                warn!("event=history_load module=history status=skipped error={err}");
                None
            }
        }
    }

    /// Records `markdown` as a prior state of `page_id`.
    pub fn append(&mut self, page_id: &str, timestamp: i64, markdown: impl Into<String>) {
        let entries = self.pages.entry(page_id.to_string()).or_default();
        entries.push_back(VersionEntry {
            timestamp,
            markdown: markdown.into(),
        });
        while entries.len() > HISTORY_CAP {
            entries.pop_front();
        }
    }

    /// Entries for `page_id`, oldest first; empty for unknown pages.
    pub fn list(&self, page_id: &str) -> Vec<VersionEntry> {
        self.pages
            .get(page_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops the whole log of a deleted page.
    pub fn remove(&mut self, page_id: &str) -> bool {
        self.pages.remove(page_id).is_some()
    }

    pub fn page_ids(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Default::default()))
    }
}
