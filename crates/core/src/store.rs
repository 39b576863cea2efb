use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::attachment::AttachmentRef;
use crate::domain::document::{ApprovalDocument, DocumentId, DocumentStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("version conflict on `{0}`")]
    VersionConflict(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page: page.max(1), per_page: per_page.clamp(1, 200) }
    }

    // A caller-built `page: 0` must behave like page 1, not underflow.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 20 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Persistence port for the document aggregate. Updates are guarded by an
/// optimistic version counter: `update` succeeds only against the expected
/// prior version, otherwise it fails with `VersionConflict` and the caller
/// decides whether to retry.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<ApprovalDocument>, StoreError>;

    async fn insert(&self, document: &ApprovalDocument) -> Result<(), StoreError>;

    async fn update(
        &self,
        document: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    /// Logically-deleted documents are excluded from every listing.
    async fn list(&self, page: PageRequest) -> Result<Page<ApprovalDocument>, StoreError>;

    async fn list_by_status(
        &self,
        status: DocumentStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError>;

    /// Documents visible to a user: authored by them, shared with them as a
    /// viewer, or carrying them anywhere in the approval line.
    async fn list_accessible_to(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError>;

    async fn orphan_attachments_for(
        &self,
        uploaded_by: &str,
    ) -> Result<Vec<AttachmentRef>, StoreError>;

    /// Stores an upload that has no document yet (`document_id = None`).
    async fn save_orphan(&self, attachment: &AttachmentRef) -> Result<(), StoreError>;
}

/// In-memory `DocumentStore` with real optimistic-version semantics, used by
/// engine unit tests.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, ApprovalDocument>>,
    orphans: RwLock<HashMap<String, AttachmentRef>>,
}

impl InMemoryDocumentStore {
    fn visible(document: &ApprovalDocument) -> bool {
        document.status != DocumentStatus::Deleted
    }

    fn paged(mut matches: Vec<ApprovalDocument>, page: PageRequest) -> Page<ApprovalDocument> {
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        let total = matches.len() as u64;
        let items = matches
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .collect();
        Page { items, total, page: page.page, per_page: page.per_page }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<ApprovalDocument>, StoreError> {
        Ok(self.documents.read().await.get(&id.0).cloned())
    }

    async fn insert(&self, document: &ApprovalDocument) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.id.0) {
            return Err(StoreError::Backend(format!("duplicate document id `{}`", document.id)));
        }
        documents.insert(document.id.0.clone(), document.clone());

        // Relinked orphans stop being orphans once the aggregate owns them.
        let mut orphans = self.orphans.write().await;
        for attachment in &document.attachments {
            orphans.remove(&attachment.id.0);
        }
        Ok(())
    }

    async fn update(
        &self,
        document: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let stored = documents
            .get(&document.id.0)
            .ok_or_else(|| StoreError::NotFound(document.id.0.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict(document.id.0.clone()));
        }
        documents.insert(document.id.0.clone(), document.clone());

        let mut orphans = self.orphans.write().await;
        for attachment in &document.attachments {
            orphans.remove(&attachment.id.0);
        }
        Ok(())
    }

    async fn list(&self, page: PageRequest) -> Result<Page<ApprovalDocument>, StoreError> {
        let documents = self.documents.read().await;
        Ok(Self::paged(documents.values().filter(|d| Self::visible(d)).cloned().collect(), page))
    }

    async fn list_by_status(
        &self,
        status: DocumentStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError> {
        let documents = self.documents.read().await;
        Ok(Self::paged(documents.values().filter(|d| d.status == status).cloned().collect(), page))
    }

    async fn list_accessible_to(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError> {
        let documents = self.documents.read().await;
        let matches = documents
            .values()
            .filter(|d| Self::visible(d))
            .filter(|d| {
                d.author_id == user_id
                    || d.viewer_ids.contains(user_id)
                    || d.approval_line.iter().any(|step| step.approver_id == user_id)
            })
            .cloned()
            .collect();
        Ok(Self::paged(matches, page))
    }

    async fn orphan_attachments_for(
        &self,
        uploaded_by: &str,
    ) -> Result<Vec<AttachmentRef>, StoreError> {
        let orphans = self.orphans.read().await;
        let mut matches: Vec<AttachmentRef> = orphans
            .values()
            .filter(|a| a.document_id.is_none() && a.uploaded_by == uploaded_by)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(matches)
    }

    async fn save_orphan(&self, attachment: &AttachmentRef) -> Result<(), StoreError> {
        self.orphans.write().await.insert(attachment.id.0.clone(), attachment.clone());
        Ok(())
    }
}


/// Narrow collaborator used only by the ID allocator's recovery path.
#[async_trait]
pub trait DocumentCountQuery: Send + Sync {
    async fn count_created_on(
        &self,
        department_code: &str,
        date: NaiveDate,
    ) -> Result<u32, StoreError>;
}

#[async_trait]
impl DocumentCountQuery for InMemoryDocumentStore {
    async fn count_created_on(
        &self,
        department_code: &str,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let prefix = format!("{}-{}-", department_code, date.format("%Y%m%d"));
        let documents = self.documents.read().await;
        Ok(documents.keys().filter(|id| id.starts_with(&prefix)).count() as u32)
    }
}
