//! Load-time normalization of the stored `sections` document.
//!
//! # Responsibility
//! - Decode every historical section/page shape into [`SectionMap`].
//! - Repair missing fields; refuse to guess at present-but-wrong ones.
//!
//! # Invariants
//! - Pass order is fixed: section shape first, then page shape.
//! - Existing `id`, `created` and `modified` values are never overwritten.
//! - Normalizing an already-normalized document changes nothing.
//! - A section whose shape is not understood is kept verbatim.
//!
//! Historical section shapes:
//! - oldest: the section value is a bare page list;
//! - current: `{ color, icon, pages }`, any of which may be missing.

use crate::model::new_id;
use crate::model::section::{Page, Section, SectionMap};
use log::{info, warn};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

const SECTION_FIELDS: &[&str] = &["color", "icon", "pages"];
const PAGE_FIELDS: &[&str] = &["id", "name", "markdown", "created", "modified", "color", "icon"];

/// Why a section was left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Section value is neither a page list nor an object.
    UnsupportedSectionShape,
    /// `pages` exists but is not a list.
    PagesNotList,
    /// A page entry is not an object.
    PageNotObject { index: usize },
    /// A known field has the wrong JSON type.
    WrongFieldType { field: &'static str },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedSectionShape => write!(f, "unsupported_section_shape"),
            Self::PagesNotList => write!(f, "pages_not_list"),
            Self::PageNotObject { index } => write!(f, "page_not_object index={index}"),
            Self::WrongFieldType { field } => write!(f, "wrong_field_type field={field}"),
        }
    }
}

/// What one normalization run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Bare page lists wrapped into section objects.
    pub sections_wrapped: usize,
    /// Section objects that had missing fields defaulted.
    pub sections_filled: usize,
    /// Pages that had at least one missing field repaired.
    pub pages_repaired: usize,
    /// Sections left untouched, with the reason.
    pub skipped: Vec<(String, SkipReason)>,
    /// The whole document was not an object and was ignored.
    pub document_unreadable: bool,
}

impl SchemaReport {
    /// Whether normalization produced a different stored shape.
    pub fn changed(&self) -> bool {
        self.sections_wrapped > 0 || self.sections_filled > 0 || self.pages_repaired > 0
    }
}

/// Normalizes a loaded `sections` document, using `now` for missing timestamps.
pub fn migrate_sections(document: Value, now: i64) -> (SectionMap, SchemaReport) {
    let mut report = SchemaReport::default();
    let mut sections = SectionMap::new();

    let entries = match document {
        Value::Object(entries) => entries,
        Value::Null => return (sections, report),
        _ => {
            warn!("event=schema_migrate module=schema status=skipped reason=document_not_object");
            report.document_unreadable = true;
            return (sections, report);
        }
    };

    for (name, raw) in entries {
        match migrate_section(&name, &raw, now, &mut report) {
            Ok(section) => sections.push(section),
            Err(reason) => {
                warn!(
                    "event=schema_migrate module=schema status=skipped section_len={} reason={}",
                    name.len(),
                    reason
                );
                report.skipped.push((name.clone(), reason));
                sections.push_unreadable(name, raw);
            }
        }
    }

    if report.changed() {
        info!(
            "event=schema_migrate module=schema status=ok sections_wrapped={} sections_filled={} pages_repaired={} skipped={}",
            report.sections_wrapped,
            report.sections_filled,
            report.pages_repaired,
            report.skipped.len()
        );
    }
    (sections, report)
}

fn migrate_section(
    name: &str,
    raw: &Value,
    now: i64,
    report: &mut SchemaReport,
) -> Result<Section, SkipReason> {
    let shaped = normalize_section_shape(raw)?;

    let mut pages = Vec::with_capacity(shaped.pages.len());
    let mut repaired = 0;
    for (index, page) in shaped.pages.iter().enumerate() {
        let Value::Object(fields) = page else {
            return Err(SkipReason::PageNotObject { index });
        };
        let (page, was_repaired) = normalize_page(fields, now)?;
        if was_repaired {
            repaired += 1;
        }
        pages.push(page);
    }

    if shaped.wrapped {
        report.sections_wrapped += 1;
    } else if shaped.filled {
        report.sections_filled += 1;
    }
    report.pages_repaired += repaired;

    Ok(Section {
        name: name.to_string(),
        color: shaped.color,
        icon: shaped.icon,
        pages,
        extra: shaped.extra,
    })
}

struct ShapedSection<'a> {
    color: String,
    icon: String,
    pages: &'a [Value],
    extra: Map<String, Value>,
    wrapped: bool,
    filled: bool,
}

/// Pass 1: bring a section value to `{ color, icon, pages }`.
fn normalize_section_shape(raw: &Value) -> Result<ShapedSection<'_>, SkipReason> {
    match raw {
        Value::Array(pages) => Ok(ShapedSection {
            color: String::new(),
            icon: String::new(),
            pages,
            extra: Map::new(),
            wrapped: true,
            filled: false,
        }),
        Value::Object(fields) => {
            let mut filled = false;
            let color = string_field(fields, "color", &mut filled)?;
            let icon = string_field(fields, "icon", &mut filled)?;
            let pages: &[Value] = match fields.get("pages") {
                None | Some(Value::Null) => {
                    filled = true;
                    &[]
                }
                Some(Value::Array(pages)) => pages,
                Some(_) => return Err(SkipReason::PagesNotList),
            };
            Ok(ShapedSection {
                color,
                icon,
                pages,
                extra: unknown_fields(fields, SECTION_FIELDS),
                wrapped: false,
                filled,
            })
        }
        _ => Err(SkipReason::UnsupportedSectionShape),
    }
}

/// Pass 2: fill missing page fields without touching present ones.
fn normalize_page(fields: &Map<String, Value>, now: i64) -> Result<(Page, bool), SkipReason> {
    let mut repaired = false;

    let id = match fields.get("id") {
        None | Some(Value::Null) => {
            repaired = true;
            new_id()
        }
        Some(Value::String(id)) if id.is_empty() => {
            repaired = true;
            new_id()
        }
        Some(Value::String(id)) => id.clone(),
        // Numeric ids from early releases are kept as their decimal text.
        Some(Value::Number(id)) => id.to_string(),
        Some(_) => return Err(SkipReason::WrongFieldType { field: "id" }),
    };

    let created = timestamp_field(fields, "created")?;
    let modified = timestamp_field(fields, "modified")?;
    let (created, modified) = match (created, modified) {
        (Some(created), Some(modified)) => (created, modified),
        (Some(created), None) => {
            repaired = true;
            (created, created.max(now))
        }
        (None, Some(modified)) => {
            repaired = true;
            (modified.min(now), modified)
        }
        (None, None) => {
            repaired = true;
            (now, now)
        }
    };

    let page = Page {
        id,
        name: string_field(fields, "name", &mut repaired)?,
        markdown: string_field(fields, "markdown", &mut repaired)?,
        created,
        modified,
        color: string_field(fields, "color", &mut repaired)?,
        icon: string_field(fields, "icon", &mut repaired)?,
        extra: unknown_fields(fields, PAGE_FIELDS),
    };
    Ok((page, repaired))
}

fn string_field(
    fields: &Map<String, Value>,
    field: &'static str,
    defaulted: &mut bool,
) -> Result<String, SkipReason> {
    match fields.get(field) {
        None | Some(Value::Null) => {
            *defaulted = true;
            Ok(String::new())
        }
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(SkipReason::WrongFieldType { field }),
    }
}

fn timestamp_field(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, SkipReason> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value.round() as i64))
            .map(Some)
            .ok_or(SkipReason::WrongFieldType { field }),
        Some(_) => Err(SkipReason::WrongFieldType { field }),
    }
}

fn unknown_fields(fields: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
