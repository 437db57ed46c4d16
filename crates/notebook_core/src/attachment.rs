//! Attachment blob lifecycle and legacy inline-payload migration.
//!
//! # Responsibility
//! - Move attachment bytes in and out of the backend's blob store.
//! - Keep the `attachments` metadata document as an ordered catalog.
//! - Convert pre-blob-store entries (base64 payload embedded in the
//!   metadata) into blob references once per load.
//!
//! # Invariants
//! - On an engine without blob support every blob call is a logged no-op.
//! - Migration never touches entries that have no inline `data` field, so
//!   running it again is a no-op.
//! - An entry whose payload could not be stored stays inline and is written
//!   back unchanged.

use crate::model::attachment::AttachmentMeta;
use crate::model::new_id;
use crate::storage::{StorageBackend, StorageResult};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

static DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^data:(?P<mime>[^;,]*)(?P<params>(?:;[^;,]*)*),(?P<payload>.*)$")
        .expect("valid data url regex")
});

/// Pre-blob-store attachment entry with its payload inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Data URL (`data:image/png;base64,...`) or bare base64.
    pub data: String,
}

/// One element of the stored `attachments` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredAttachment {
    Inline(LegacyAttachment),
    Reference(AttachmentMeta),
    /// Shape not understood; preserved verbatim.
    Unrecognized(Value),
}

/// Ordered attachment metadata as held by the session mirror.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentCatalog {
    entries: Vec<StoredAttachment>,
}

impl AttachmentCatalog {
    pub fn from_entries(entries: Vec<StoredAttachment>) -> Self {
        Self { entries }
    }

    /// Decodes the stored document.
    ///
    /// Returns `None` when the document is not a list; the caller keeps the
    /// stored value untouched in that case.
    pub fn from_document(document: Value) -> Option<Self> {
        match document {
            Value::Array(items) => Some(Self::from_entries(
                items
                    .into_iter()
                    .map(|item| {
                        serde_json::from_value(item.clone())
                            .unwrap_or(StoredAttachment::Unrecognized(item))
                    })
                    .collect(),
            )),
            Value::Null => Some(Self::default()),
            other => {
                warn!(
                    "event=attachments_load module=attachment status=skipped reason=not_a_list kind={}",
                    json_kind(&other)
                );
                None
            }
        }
    }

    /// Attachments that are plain blob references.
    pub fn metas(&self) -> impl Iterator<Item = &AttachmentMeta> {
        self.entries.iter().filter_map(|entry| match entry {
            StoredAttachment::Reference(meta) => Some(meta),
            _ => None,
        })
    }

    pub fn get(&self, id: &str) -> Option<&AttachmentMeta> {
        self.metas().find(|meta| meta.id == id)
    }

    /// Number of entries still carrying an inline payload.
    pub fn pending_legacy(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, StoredAttachment::Inline(_)))
            .count()
    }

    pub fn entries(&self) -> &[StoredAttachment] {
        &self.entries
    }

    pub(crate) fn push(&mut self, meta: AttachmentMeta) {
        self.entries.push(StoredAttachment::Reference(meta));
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<AttachmentMeta> {
        let index = self.entries.iter().position(
            |entry| matches!(entry, StoredAttachment::Reference(meta) if meta.id == id),
        )?;
        match self.entries.remove(index) {
            StoredAttachment::Reference(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn to_document(&self) -> Value {
        serde_json::to_value(&self.entries).unwrap_or(Value::Array(Vec::new()))
    }
}

/// Outcome counts of one legacy migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyMigrationReport {
    pub migrated: usize,
    pub retained: usize,
}

impl LegacyMigrationReport {
    pub fn changed(&self) -> bool {
        self.migrated > 0
    }
}

/// Blob operations bound to one notebook backend.
pub struct AttachmentStore<'a> {
    backend: &'a dyn StorageBackend,
}

impl<'a> AttachmentStore<'a> {
    pub fn new(backend: &'a dyn StorageBackend) -> Self {
        Self { backend }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.supports_blobs()
    }

    pub fn put_blob(&self, id: &str, bytes: &[u8]) -> StorageResult<()> {
        if !self.capability_check("put") {
            return Ok(());
        }
        self.backend.write_blob(id, bytes)
    }

    /// Returns `None` for unknown ids and on engines without blob support.
    pub fn get_blob(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        if !self.capability_check("get") {
            return Ok(None);
        }
        self.backend.read_blob(id)
    }

    pub fn delete_blob(&self, id: &str) -> StorageResult<()> {
        if !self.capability_check("delete") {
            return Ok(());
        }
        self.backend.remove_blob(id)
    }

    /// Stores `bytes` under a fresh id and returns the metadata reference.
    ///
    /// On an engine without blob support the metadata is still returned but
    /// no bytes are kept.
    pub fn store_new(
        &self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> StorageResult<AttachmentMeta> {
        let meta = AttachmentMeta {
            id: new_id(),
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
        };
        self.put_blob(&meta.id, bytes)?;
        Ok(meta)
    }

    /// Rewrites every inline entry of `catalog` as a blob reference.
    pub fn migrate_legacy(&self, catalog: &mut AttachmentCatalog) -> LegacyMigrationReport {
        let mut report = LegacyMigrationReport::default();
        let pending = catalog.pending_legacy();
        if pending == 0 {
            return report;
        }
        if !self.is_supported() {
            warn!(
                "event=attachment_migrate module=attachment status=skipped reason=blobs_unsupported pending={}",
                pending
            );
            report.retained = pending;
            return report;
        }

        for entry in &mut catalog.entries {
            let StoredAttachment::Inline(legacy) = entry else {
                continue;
            };
            match self.migrate_one(legacy) {
                Some(meta) => {
                    *entry = StoredAttachment::Reference(meta);
                    report.migrated += 1;
                }
                None => report.retained += 1,
            }
        }

        info!(
            "event=attachment_migrate module=attachment status=ok migrated={} retained={}",
            report.migrated, report.retained
        );
        report
    }

    fn migrate_one(&self, legacy: &LegacyAttachment) -> Option<AttachmentMeta> {
        let Some(payload) = decode_inline_payload(&legacy.data) else {
            warn!(
                "event=attachment_migrate module=attachment status=skipped reason=undecodable_payload data_len={}",
                legacy.data.len()
            );
            return None;
        };

        let mime_type = legacy
            .mime_type
            .clone()
            .filter(|value| !value.trim().is_empty())
            .or(payload.mime_type)
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let meta = AttachmentMeta {
            id: new_id(),
            name: legacy.name.clone(),
            mime_type,
            size: payload.bytes.len() as u64,
        };

        if let Err(err) = self.backend.write_blob(&meta.id, &payload.bytes) {
            error!(
                "event=attachment_migrate module=attachment status=error size={} error={}",
                meta.size, err
            );
            return None;
        }
        Some(meta)
    }

    fn capability_check(&self, operation: &str) -> bool {
        if self.backend.supports_blobs() {
            return true;
        }
        warn!(
            "event=blob_{operation} module=attachment status=skipped reason=blobs_unsupported backend={}",
            self.backend.kind().as_str()
        );
        false
    }
}

/// Raw bytes recovered from an inline payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePayload {
    /// MIME type announced by a data URL header, when present.
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Decodes a data URL or bare base64 string.
///
/// Returns `None` when the payload is not valid base64 (or, for non-base64
/// data URLs, not valid percent-encoding).
pub fn decode_inline_payload(data: &str) -> Option<InlinePayload> {
    let trimmed = data.trim();
    if let Some(caps) = DATA_URL_RE.captures(trimmed) {
        let mime_type = caps
            .name("mime")
            .map(|m| m.as_str().trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty());
        let is_base64 = caps
            .name("params")
            .map(|m| {
                m.as_str()
                    .split(';')
                    .any(|param| param.trim().eq_ignore_ascii_case("base64"))
            })
            .unwrap_or(false);
        let payload = caps.name("payload").map_or("", |m| m.as_str());
        let bytes = if is_base64 {
            decode_base64(payload)?
        } else {
            urlencoding::decode_binary(payload.as_bytes()).into_owned()
        };
        return Some(InlinePayload { mime_type, bytes });
    }

    decode_base64(trimmed).map(|bytes| InlinePayload {
        mime_type: None,
        bytes,
    })
}

fn decode_base64(payload: &str) -> Option<Vec<u8>> {
    let cleaned: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(cleaned.as_bytes()))
        .ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_inline_payload, AttachmentCatalog, StoredAttachment};
    use serde_json::json;

    #[test]
    fn decodes_base64_data_url_with_mime() {
        let payload = decode_inline_payload("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(payload.mime_type.as_deref(), Some("image/png"));
        assert_eq!(payload.bytes, b"hello");
    }

    #[test]
    fn decodes_bare_base64_and_percent_encoded_data_url() {
        let bare = decode_inline_payload("aGVsbG8=").unwrap();
        assert_eq!(bare.mime_type, None);
        assert_eq!(bare.bytes, b"hello");

        let text = decode_inline_payload("data:text/plain,hi%20there").unwrap();
        assert_eq!(text.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(text.bytes, b"hi there");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_inline_payload("data:image/png;base64,@@@").is_none());
    }

    #[test]
    fn catalog_classifies_entries_by_shape() {
        let catalog = AttachmentCatalog::from_document(json!([
            {"id": "a1", "name": "one.png", "mimeType": "image/png", "size": 3},
            {"name": "old.png", "data": "data:image/png;base64,AAAA"},
            {"unexpected": true}
        ]))
        .unwrap();

        assert_eq!(catalog.metas().count(), 1);
        assert_eq!(catalog.pending_legacy(), 1);
        assert!(matches!(
            catalog.entries()[2],
            StoredAttachment::Unrecognized(_)
        ));
        assert_eq!(
            catalog.to_document()[2],
            json!({"unexpected": true})
        );
    }

    #[test]
    fn non_list_document_is_unreadable() {
        assert!(AttachmentCatalog::from_document(json!({"a": 1})).is_none());
        assert_eq!(
            AttachmentCatalog::from_document(serde_json::Value::Null),
            Some(AttachmentCatalog::default())
        );
    }
}
