use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::attachment::AttachmentRef;
use crate::domain::document::{ApprovalDocument, DocType, DocumentStatus};
use crate::domain::step::ApproverStep;

/// Read projection returned by every workflow operation. Carries human
/// labels alongside the raw tags so boundaries do not re-derive them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    pub id: String,
    pub title: String,
    pub doc_type: DocType,
    pub doc_type_label: String,
    pub status: DocumentStatus,
    pub status_label: String,
    pub department_code: String,
    pub author_id: String,
    pub author_name: String,
    pub content: serde_json::Value,
    pub approval_line: Vec<ApproverStep>,
    pub current_index: usize,
    pub viewer_ids: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl From<&ApprovalDocument> for DocumentView {
    fn from(document: &ApprovalDocument) -> Self {
        Self {
            id: document.id.0.clone(),
            title: document.title.clone(),
            doc_type: document.doc_type,
            doc_type_label: document.doc_type.label().to_owned(),
            status: document.status,
            status_label: document.status.label().to_owned(),
            department_code: document.department_code.clone(),
            author_id: document.author_id.clone(),
            author_name: document.author_name.clone(),
            content: document.content.clone(),
            approval_line: document.approval_line.clone(),
            current_index: document.current_index,
            viewer_ids: document.viewer_ids.iter().cloned().collect(),
            attachments: document.attachments.clone(),
            created_at: document.created_at,
            updated_at: document.updated_at,
            approved_by: document.approved_by.clone(),
            approved_at: document.approved_at,
            rejected_by: document.rejected_by.clone(),
            rejected_reason: document.rejected_reason.clone(),
            rejected_at: document.rejected_at,
            version: document.version,
        }
    }
}
