//! Attachment metadata record.

use serde::{Deserialize, Serialize};

/// Reference to one binary blob stored outside the JSON documents.
///
/// The blob lives in the backend's blob store under the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Blob length in bytes.
    pub size: u64,
}

impl AttachmentMeta {
    /// Whether the attachment can be rendered inline as an image.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}
