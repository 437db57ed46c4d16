//! Section and page records plus the ordered section map.
//!
//! # Responsibility
//! - Hold the canonical page/section shape produced by schema migration.
//! - Serialize back to the stored `sections` document (name -> section).
//!
//! # Invariants
//! - Section order and page order are preserved through load and save.
//! - Sections the migrator could not interpret are kept verbatim and
//!   written back unchanged.

use super::{new_id, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One page of markdown inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Opaque stable token; never reassigned.
    pub id: String,
    pub name: String,
    pub markdown: String,
    /// Epoch milliseconds; set once at creation.
    pub created: i64,
    /// Epoch milliseconds; bumped by every successful save.
    pub modified: i64,
    pub color: String,
    pub icon: String,
    /// Fields written by other releases, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Page {
    /// Creates an empty page with a fresh id and `created == modified`.
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: new_id(),
            name: name.into(),
            markdown: String::new(),
            created: now,
            modified: now,
            color: String::new(),
            icon: String::new(),
            extra: Map::new(),
        }
    }
}

/// Named, ordered group of pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub color: String,
    pub icon: String,
    pub pages: Vec<Page>,
    /// Section-level fields written by other releases.
    pub extra: Map<String, Value>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: String::new(),
            icon: String::new(),
            pages: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    pub fn page_mut(&mut self, page_id: &str) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.id == page_id)
    }

    fn to_value(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert("color".to_string(), Value::String(self.color.clone()));
        object.insert("icon".to_string(), Value::String(self.icon.clone()));
        let pages = self
            .pages
            .iter()
            .map(|page| serde_json::to_value(page).unwrap_or(Value::Null))
            .collect();
        object.insert("pages".to_string(), Value::Array(pages));
        Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SectionSlot {
    Ready(Section),
    Unreadable { name: String, raw: Value },
}

impl SectionSlot {
    fn name(&self) -> &str {
        match self {
            Self::Ready(section) => section.name.as_str(),
            Self::Unreadable { name, .. } => name.as_str(),
        }
    }
}

/// Ordered `sections` document as held by the session mirror.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionMap {
    slots: Vec<SectionSlot>,
}

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterates readable sections in stored order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.slots.iter().filter_map(|slot| match slot {
            SectionSlot::Ready(section) => Some(section),
            SectionSlot::Unreadable { .. } => None,
        })
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections().find(|section| section.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.slots.iter_mut().find_map(|slot| match slot {
            SectionSlot::Ready(section) if section.name == name => Some(section),
            _ => None,
        })
    }

    /// Whether `name` is taken by any section, readable or not.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.name() == name)
    }

    /// Names of sections kept verbatim because their shape was not understood.
    pub fn unreadable_names(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                SectionSlot::Unreadable { name, .. } => Some(name.as_str()),
                SectionSlot::Ready(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finds a page anywhere in the notebook.
    pub fn find_page(&self, page_id: &str) -> Option<(&Section, &Page)> {
        self.sections()
            .find_map(|section| section.page(page_id).map(|page| (section, page)))
    }

    /// Appends a section; the caller has already checked the name is free.
    pub(crate) fn push(&mut self, section: Section) {
        self.slots.push(SectionSlot::Ready(section));
    }

    pub(crate) fn push_unreadable(&mut self, name: String, raw: Value) {
        self.slots.push(SectionSlot::Unreadable { name, raw });
    }

    /// Serializes back into the stored `name -> section` object.
    pub fn to_document(&self) -> Value {
        let mut document = Map::new();
        for slot in &self.slots {
            match slot {
                SectionSlot::Ready(section) => {
                    document.insert(section.name.clone(), section.to_value());
                }
                SectionSlot::Unreadable { name, raw } => {
                    document.insert(name.clone(), raw.clone());
                }
            }
        }
        Value::Object(document)
    }
}
