use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::domain::attachment::{AttachmentId, AttachmentRef, UploadedFile};
use crate::domain::document::DocumentId;
use crate::errors::WorkflowError;
use crate::store::StoreError;

/// Physical file storage port. `delete` is idempotent: a missing underlying
/// file is not an error.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persists the payload and returns the stored reference.
    async fn store(&self, upload: &UploadedFile) -> Result<String, StoreError>;

    async fn delete(&self, stored_ref: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileStore {
    pub async fn contains(&self, stored_ref: &str) -> bool {
        self.files.read().await.contains_key(stored_ref)
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn store(&self, upload: &UploadedFile) -> Result<String, StoreError> {
        let stored_ref = format!("{}-{}", Uuid::new_v4(), upload.file_name);
        self.files.write().await.insert(stored_ref.clone(), upload.bytes.clone());
        Ok(stored_ref)
    }

    async fn delete(&self, stored_ref: &str) -> Result<(), StoreError> {
        self.files.write().await.remove(stored_ref);
        Ok(())
    }
}

/// Inputs for one reconciliation pass.
pub struct ReconcileRequest<'a> {
    pub document_id: &'a DocumentId,
    pub uploaded_by: &'a str,
    /// Attachments currently stored on the document.
    pub current: &'a [AttachmentRef],
    /// Ids of current attachments the caller wants to keep.
    pub retained_ids: &'a [AttachmentId],
    pub new_uploads: Vec<UploadedFile>,
    /// Orphan uploads by the same actor, auto-linked unless their filename
    /// collides with something already being attached.
    pub orphans: Vec<AttachmentRef>,
    pub now: DateTime<Utc>,
}

/// Computes the delta between a document's stored attachments and the
/// caller's desired final set, and returns the full replacement collection.
/// The document's attachment list is swapped wholesale rather than mutated
/// incrementally.
#[derive(Clone)]
pub struct AttachmentReconciler {
    files: Arc<dyn FileStore>,
}

impl AttachmentReconciler {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    pub async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<Vec<AttachmentRef>, WorkflowError> {
        let retained: HashSet<&str> =
            request.retained_ids.iter().map(|id| id.0.as_str()).collect();

        let mut merged = Vec::new();
        for attachment in request.current {
            if retained.contains(attachment.id.0.as_str()) {
                merged.push(attachment.clone());
                continue;
            }
            // Physical deletion is best-effort; a storage hiccup must not
            // fail the workflow operation.
            if let Err(error) = self.files.delete(&attachment.stored_ref).await {
                warn!(
                    document_id = %request.document_id,
                    stored_ref = %attachment.stored_ref,
                    %error,
                    "attachment file deletion failed"
                );
            }
        }

        for upload in &request.new_uploads {
            let stored_ref = self.files.store(upload).await?;
            merged.push(AttachmentRef {
                id: AttachmentId(Uuid::new_v4().to_string()),
                document_id: Some(request.document_id.clone()),
                file_name: upload.file_name.clone(),
                stored_ref,
                content_type: upload.content_type.clone(),
                size_bytes: upload.bytes.len() as i64,
                uploaded_by: request.uploaded_by.to_owned(),
                uploaded_at: request.now,
            });
        }

        let attached_names: HashSet<String> =
            merged.iter().map(|a| a.file_name.clone()).collect();
        for orphan in request.orphans {
            if attached_names.contains(&orphan.file_name) {
                continue;
            }
            merged.push(AttachmentRef {
                document_id: Some(request.document_id.clone()),
                ..orphan
            });
        }

        Ok(merged)
    }
}
