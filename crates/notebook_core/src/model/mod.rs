//! Canonical in-memory shapes for notebook documents.
//!
//! # Responsibility
//! - Define the typed records the session mirror holds after load.
//! - Keep the stored JSON field names stable across releases.
//!
//! # Invariants
//! - `Page::id` and `Page::created` are assigned once and never rewritten.
//! - `Page::created <= Page::modified`.
//! - Section names are unique within one notebook.

pub mod attachment;
pub mod section;
pub mod template;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Generates a fresh opaque identifier for pages and attachments.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
