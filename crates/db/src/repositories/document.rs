use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use docflow_core::domain::attachment::{AttachmentId, AttachmentRef};
use docflow_core::domain::document::{ApprovalDocument, DocType, DocumentId, DocumentStatus};
use docflow_core::domain::step::{ApproverStep, StepDecision};
use docflow_core::store::{
    DocumentCountQuery, DocumentStore, Page, PageRequest, StoreError,
};

use super::{db_err, decode_err, parse_timestamp};
use crate::DbPool;

/// Durable `DocumentStore` over sqlite. The aggregate is split across four
/// tables (`document`, `approval_step`, `attachment`, `document_viewer`); the
/// chain and viewer rows are rebuilt wholesale on every update, matching the
/// immutable-steps model of the domain.
pub struct SqlDocumentStore {
    pool: DbPool,
}

impl SqlDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDocument, StoreError> {
        let mut document = row_to_document(row)?;
        let id = document.id.0.clone();

        let step_rows = sqlx::query(
            "SELECT step_order, approver_id, approver_name, decision, comment,
                    decided_at, signature_ref
             FROM approval_step WHERE document_id = ? ORDER BY step_order ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        document.approval_line =
            step_rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

        let attachment_rows = sqlx::query(
            "SELECT id, document_id, file_name, stored_ref, content_type, size_bytes,
                    uploaded_by, uploaded_at
             FROM attachment WHERE document_id = ? ORDER BY uploaded_at ASC, id ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        document.attachments =
            attachment_rows.iter().map(row_to_attachment).collect::<Result<Vec<_>, _>>()?;

        let viewer_rows =
            sqlx::query("SELECT user_id FROM document_viewer WHERE document_id = ?")
                .bind(&id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        document.viewer_ids = viewer_rows
            .iter()
            .map(|r| r.try_get::<String, _>("user_id").map_err(decode_err))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(document)
    }

    async fn hydrate_page(
        &self,
        rows: Vec<sqlx::sqlite::SqliteRow>,
        total: u64,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError> {
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.hydrate(row).await?);
        }
        Ok(Page { items, total, page: page.page, per_page: page.per_page })
    }

    async fn write_children(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        document: &ApprovalDocument,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM approval_step WHERE document_id = ?")
            .bind(&document.id.0)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        for step in &document.approval_line {
            sqlx::query(
                "INSERT INTO approval_step (document_id, step_order, approver_id, approver_name,
                                            decision, comment, decided_at, signature_ref)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&document.id.0)
            .bind(step.order)
            .bind(&step.approver_id)
            .bind(&step.approver_name)
            .bind(step.decision.as_str())
            .bind(&step.comment)
            .bind(step.decided_at.map(|dt| dt.to_rfc3339()))
            .bind(&step.signature_ref)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query("DELETE FROM document_viewer WHERE document_id = ?")
            .bind(&document.id.0)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        for viewer in &document.viewer_ids {
            sqlx::query("INSERT INTO document_viewer (document_id, user_id) VALUES (?, ?)")
                .bind(&document.id.0)
                .bind(viewer)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
        }

        // Rows removed from the aggregate are deleted; linked orphans already
        // have a row with a NULL document_id, so attachments upsert.
        sqlx::query("DELETE FROM attachment WHERE document_id = ?")
            .bind(&document.id.0)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        for attachment in &document.attachments {
            sqlx::query(
                "INSERT INTO attachment (id, document_id, file_name, stored_ref, content_type,
                                         size_bytes, uploaded_by, uploaded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     document_id = excluded.document_id,
                     file_name = excluded.file_name,
                     stored_ref = excluded.stored_ref,
                     content_type = excluded.content_type,
                     size_bytes = excluded.size_bytes,
                     uploaded_by = excluded.uploaded_by,
                     uploaded_at = excluded.uploaded_at",
            )
            .bind(&attachment.id.0)
            .bind(attachment.document_id.as_ref().map(|d| d.0.as_str()))
            .bind(&attachment.file_name)
            .bind(&attachment.stored_ref)
            .bind(&attachment.content_type)
            .bind(attachment.size_bytes)
            .bind(&attachment.uploaded_by)
            .bind(attachment.uploaded_at.to_rfc3339())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        Ok(())
    }
}

const DOCUMENT_COLUMNS: &str = "id, doc_type, status, title, content, current_index,
       author_id, author_name, department_id, department_code,
       created_by, created_at, updated_by, updated_at,
       approved_by, approved_at, rejected_by, rejected_reason, rejected_at,
       deleted_by, deleted_reason, deleted_at, version";

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDocument, StoreError> {
    let doc_type_str: String = row.try_get("doc_type").map_err(decode_err)?;
    let doc_type = DocType::parse(&doc_type_str)
        .ok_or_else(|| StoreError::Backend(format!("unknown doc type `{doc_type_str}`")))?;
    let status_str: String = row.try_get("status").map_err(decode_err)?;
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Backend(format!("unknown status `{status_str}`")))?;

    let content_str: String = row.try_get("content").map_err(decode_err)?;
    let content = serde_json::from_str(&content_str)
        .map_err(|e| StoreError::Backend(format!("content is not valid json: {e}")))?;

    let current_index: i64 = row.try_get("current_index").map_err(decode_err)?;

    Ok(ApprovalDocument {
        id: DocumentId(row.try_get("id").map_err(decode_err)?),
        doc_type,
        status,
        title: row.try_get("title").map_err(decode_err)?,
        content,
        approval_line: Vec::new(),
        current_index: current_index.max(0) as usize,
        viewer_ids: BTreeSet::new(),
        attachments: Vec::new(),
        author_id: row.try_get("author_id").map_err(decode_err)?,
        author_name: row.try_get("author_name").map_err(decode_err)?,
        department_id: row.try_get("department_id").map_err(decode_err)?,
        department_code: row.try_get("department_code").map_err(decode_err)?,
        created_by: row.try_get("created_by").map_err(decode_err)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(decode_err)?),
        updated_by: row.try_get("updated_by").map_err(decode_err)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(decode_err)?),
        approved_by: row.try_get("approved_by").map_err(decode_err)?,
        approved_at: opt_timestamp(row.try_get("approved_at").map_err(decode_err)?),
        rejected_by: row.try_get("rejected_by").map_err(decode_err)?,
        rejected_reason: row.try_get("rejected_reason").map_err(decode_err)?,
        rejected_at: opt_timestamp(row.try_get("rejected_at").map_err(decode_err)?),
        deleted_by: row.try_get("deleted_by").map_err(decode_err)?,
        deleted_reason: row.try_get("deleted_reason").map_err(decode_err)?,
        deleted_at: opt_timestamp(row.try_get("deleted_at").map_err(decode_err)?),
        version: row.try_get("version").map_err(decode_err)?,
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApproverStep, StoreError> {
    let order: i64 = row.try_get("step_order").map_err(decode_err)?;
    let decision_str: String = row.try_get("decision").map_err(decode_err)?;
    Ok(ApproverStep {
        order: order.max(0) as u32,
        approver_id: row.try_get("approver_id").map_err(decode_err)?,
        approver_name: row.try_get("approver_name").map_err(decode_err)?,
        decision: StepDecision::parse(&decision_str),
        comment: row.try_get("comment").map_err(decode_err)?,
        decided_at: opt_timestamp(row.try_get("decided_at").map_err(decode_err)?),
        signature_ref: row.try_get("signature_ref").map_err(decode_err)?,
    })
}

pub(crate) fn row_to_attachment(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<AttachmentRef, StoreError> {
    Ok(AttachmentRef {
        id: AttachmentId(row.try_get("id").map_err(decode_err)?),
        document_id: row
            .try_get::<Option<String>, _>("document_id")
            .map_err(decode_err)?
            .map(DocumentId),
        file_name: row.try_get("file_name").map_err(decode_err)?,
        stored_ref: row.try_get("stored_ref").map_err(decode_err)?,
        content_type: row.try_get("content_type").map_err(decode_err)?,
        size_bytes: row.try_get("size_bytes").map_err(decode_err)?,
        uploaded_by: row.try_get("uploaded_by").map_err(decode_err)?,
        uploaded_at: parse_timestamp(
            &row.try_get::<String, _>("uploaded_at").map_err(decode_err)?,
        ),
    })
}

fn opt_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_timestamp)
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<ApprovalDocument>, StoreError> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM document WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, document: &ApprovalDocument) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO document (id, doc_type, status, title, content, current_index,
                                   author_id, author_name, department_id, department_code,
                                   created_by, created_at, updated_by, updated_at,
                                   approved_by, approved_at, rejected_by, rejected_reason,
                                   rejected_at, deleted_by, deleted_reason, deleted_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id.0)
        .bind(document.doc_type.as_str())
        .bind(document.status.as_str())
        .bind(&document.title)
        .bind(document.content.to_string())
        .bind(document.current_index as i64)
        .bind(&document.author_id)
        .bind(&document.author_name)
        .bind(document.department_id)
        .bind(&document.department_code)
        .bind(&document.created_by)
        .bind(document.created_at.to_rfc3339())
        .bind(&document.updated_by)
        .bind(document.updated_at.to_rfc3339())
        .bind(&document.approved_by)
        .bind(document.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(&document.rejected_by)
        .bind(&document.rejected_reason)
        .bind(document.rejected_at.map(|dt| dt.to_rfc3339()))
        .bind(&document.deleted_by)
        .bind(&document.deleted_reason)
        .bind(document.deleted_at.map(|dt| dt.to_rfc3339()))
        .bind(document.version)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        self.write_children(&mut tx, document).await?;
        tx.commit().await.map_err(db_err)
    }

    async fn update(
        &self,
        document: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            "UPDATE document SET
                 doc_type = ?, status = ?, title = ?, content = ?, current_index = ?,
                 author_id = ?, author_name = ?, department_id = ?, department_code = ?,
                 updated_by = ?, updated_at = ?,
                 approved_by = ?, approved_at = ?,
                 rejected_by = ?, rejected_reason = ?, rejected_at = ?,
                 deleted_by = ?, deleted_reason = ?, deleted_at = ?,
                 version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(document.doc_type.as_str())
        .bind(document.status.as_str())
        .bind(&document.title)
        .bind(document.content.to_string())
        .bind(document.current_index as i64)
        .bind(&document.author_id)
        .bind(&document.author_name)
        .bind(document.department_id)
        .bind(&document.department_code)
        .bind(&document.updated_by)
        .bind(document.updated_at.to_rfc3339())
        .bind(&document.approved_by)
        .bind(document.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(&document.rejected_by)
        .bind(&document.rejected_reason)
        .bind(document.rejected_at.map(|dt| dt.to_rfc3339()))
        .bind(&document.deleted_by)
        .bind(&document.deleted_reason)
        .bind(document.deleted_at.map(|dt| dt.to_rfc3339()))
        .bind(document.version)
        .bind(&document.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM document WHERE id = ?")
                .bind(&document.id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            return match exists {
                Some(_) => Err(StoreError::VersionConflict(document.id.0.clone())),
                None => Err(StoreError::NotFound(document.id.0.clone())),
            };
        }

        self.write_children(&mut tx, document).await?;
        tx.commit().await.map_err(db_err)
    }

    async fn list(&self, page: PageRequest) -> Result<Page<ApprovalDocument>, StoreError> {
        let total = sqlx::query("SELECT COUNT(*) AS count FROM document WHERE status != 'deleted'")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?
            .try_get::<i64, _>("count")
            .map_err(decode_err)?;

        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE status != 'deleted'
             ORDER BY created_at DESC, id ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(page.per_page)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        self.hydrate_page(rows, total.max(0) as u64, page).await
    }

    async fn list_by_status(
        &self,
        status: DocumentStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError> {
        let total = sqlx::query("SELECT COUNT(*) AS count FROM document WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?
            .try_get::<i64, _>("count")
            .map_err(decode_err)?;

        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE status = ?
             ORDER BY created_at DESC, id ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(status.as_str())
        .bind(page.per_page)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        self.hydrate_page(rows, total.max(0) as u64, page).await
    }

    async fn list_accessible_to(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<ApprovalDocument>, StoreError> {
        const VISIBILITY: &str = "status != 'deleted' AND (
                 author_id = ?1
                 OR EXISTS (SELECT 1 FROM document_viewer v
                            WHERE v.document_id = document.id AND v.user_id = ?1)
                 OR EXISTS (SELECT 1 FROM approval_step s
                            WHERE s.document_id = document.id AND s.approver_id = ?1))";

        let total =
            sqlx::query(&format!("SELECT COUNT(*) AS count FROM document WHERE {VISIBILITY}"))
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?
                .try_get::<i64, _>("count")
                .map_err(decode_err)?;

        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE {VISIBILITY}
             ORDER BY created_at DESC, id ASC
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(user_id)
        .bind(page.per_page)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        self.hydrate_page(rows, total.max(0) as u64, page).await
    }

    async fn orphan_attachments_for(
        &self,
        uploaded_by: &str,
    ) -> Result<Vec<AttachmentRef>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, document_id, file_name, stored_ref, content_type, size_bytes,
                    uploaded_by, uploaded_at
             FROM attachment
             WHERE document_id IS NULL AND uploaded_by = ?
             ORDER BY uploaded_at ASC, id ASC",
        )
        .bind(uploaded_by)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_attachment).collect()
    }

    async fn save_orphan(&self, attachment: &AttachmentRef) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO attachment (id, document_id, file_name, stored_ref, content_type,
                                     size_bytes, uploaded_by, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 file_name = excluded.file_name,
                 stored_ref = excluded.stored_ref,
                 content_type = excluded.content_type,
                 size_bytes = excluded.size_bytes,
                 uploaded_by = excluded.uploaded_by,
                 uploaded_at = excluded.uploaded_at",
        )
        .bind(&attachment.id.0)
        .bind(attachment.document_id.as_ref().map(|d| d.0.as_str()))
        .bind(&attachment.file_name)
        .bind(&attachment.stored_ref)
        .bind(&attachment.content_type)
        .bind(attachment.size_bytes)
        .bind(&attachment.uploaded_by)
        .bind(attachment.uploaded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentCountQuery for SqlDocumentStore {
    async fn count_created_on(
        &self,
        department_code: &str,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let prefix = format!("{}-{}-%", department_code, date.format("%Y%m%d"));
        let count = sqlx::query("SELECT COUNT(*) AS count FROM document WHERE id LIKE ?")
            .bind(&prefix)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?
            .try_get::<i64, _>("count")
            .map_err(decode_err)?;
        Ok(count.max(0) as u32)
    }
}
