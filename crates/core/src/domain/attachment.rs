use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

/// Reference to a stored file. `document_id` is `None` for orphan uploads:
/// files uploaded before their document existed, later auto-linked by the
/// attachment reconciler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: AttachmentId,
    pub document_id: Option<DocumentId>,
    pub file_name: String,
    pub stored_ref: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Raw upload payload handed to the reconciler before it is persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}
