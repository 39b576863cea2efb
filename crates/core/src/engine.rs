use std::sync::Arc;

use tracing::warn;

use crate::allocator::{Clock, DocumentIdAllocator};
use crate::attachments::{AttachmentReconciler, FileStore, ReconcileRequest};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::directory::{ActorRef, ActorResolver, Employee, PeopleDirectory};
use crate::domain::attachment::{AttachmentId, UploadedFile};
use crate::domain::document::{ApprovalDocument, DocType, DocumentId, DocumentStatus};
use crate::domain::step::StepDecision;
use crate::errors::WorkflowError;
use crate::notifications::{
    ApprovalCompleteNote, ApprovalRequestNote, Notifier, ProjectTrigger, RejectNote,
};
use crate::policy::{ManualStep, PolicyResolver, PolicyStore};
use crate::projection::DocumentView;
use crate::store::{DocumentCountQuery, DocumentStore, Page, PageRequest};

/// Suffix appended to the `*_by` audit field when an administrator bypasses
/// the approval chain.
pub const OVERRIDE_MARKER: &str = "[override]";

/// Payload for creating a document via `draft` or the new-document `submit`
/// path.
#[derive(Clone, Debug, Default)]
pub struct NewDocument {
    pub title: String,
    pub doc_type: Option<DocType>,
    pub content: serde_json::Value,
    /// Used only when no standing policy exists for the doc type.
    pub manual_chain: Vec<ManualStep>,
    pub viewer_ids: Vec<String>,
    pub new_uploads: Vec<UploadedFile>,
    /// Defaults to the author's own department.
    pub department_code: Option<String>,
}

#[derive(Clone, Debug)]
pub enum SubmitRequest {
    /// Move an existing draft into the approval cycle, keeping its id and
    /// chain.
    ExistingDraft(DocumentId),
    /// Create and submit in one step.
    New(NewDocument),
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalInput {
    pub comment: String,
    pub signature_ref: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ResubmitRequest {
    pub title: String,
    pub content: serde_json::Value,
    pub retained_attachment_ids: Vec<AttachmentId>,
    pub new_uploads: Vec<UploadedFile>,
}

/// The approval workflow state machine. Owns a document's life from creation
/// through a strictly sequential approval chain, including rejection and
/// resubmission cycles and administrative overrides.
///
/// Every operation is one atomic unit against the document store; the
/// optimistic version counter rejects the second of two conflicting writers.
/// Notification and project-trigger side effects run only after the state
/// change is durable and are best-effort.
pub struct WorkflowEngine {
    documents: Arc<dyn DocumentStore>,
    directory: Arc<dyn PeopleDirectory>,
    actors: ActorResolver,
    allocator: DocumentIdAllocator,
    resolver: PolicyResolver,
    reconciler: AttachmentReconciler,
    notifier: Arc<dyn Notifier>,
    projects: Arc<dyn ProjectTrigger>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        counts: Arc<dyn DocumentCountQuery>,
        policies: Arc<dyn PolicyStore>,
        directory: Arc<dyn PeopleDirectory>,
        files: Arc<dyn FileStore>,
        notifier: Arc<dyn Notifier>,
        projects: Arc<dyn ProjectTrigger>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            directory: directory.clone(),
            actors: ActorResolver::new(directory.clone()),
            allocator: DocumentIdAllocator::new(clock.clone(), counts),
            resolver: PolicyResolver::new(policies, directory),
            reconciler: AttachmentReconciler::new(files),
            notifier,
            projects,
            audit,
            clock,
        }
    }

    // ---- write operations -------------------------------------------------

    pub async fn draft(
        &self,
        actor: &ActorRef,
        request: NewDocument,
    ) -> Result<DocumentView, WorkflowError> {
        let author = self.actors.resolve(actor).await?;
        let document = self.create_document(&author, request, DocumentStatus::Draft).await?;

        self.emit(&document, "workflow.drafted", &author.username, AuditOutcome::Success, &[]);
        Ok(DocumentView::from(&document))
    }

    pub async fn submit(
        &self,
        actor: &ActorRef,
        request: SubmitRequest,
    ) -> Result<DocumentView, WorkflowError> {
        let author = self.actors.resolve(actor).await?;

        let document = match request {
            SubmitRequest::ExistingDraft(id) => {
                let mut document = self.load(&id).await?;
                require_status(&document, DocumentStatus::Draft, "submit")?;
                if document.author_id != author.username {
                    return Err(WorkflowError::Unauthorized(format!(
                        "only the author may submit draft `{}`",
                        document.id
                    )));
                }

                let expected = document.version;
                document.status = DocumentStatus::InProgress;
                document.current_index = 0;
                self.stamp(&mut document, &author);
                self.persist_update(document, expected).await?
            }
            SubmitRequest::New(new_document) => {
                self.create_document(&author, new_document, DocumentStatus::InProgress).await?
            }
        };

        self.emit(&document, "workflow.submitted", &author.username, AuditOutcome::Success, &[]);
        self.notify_current_approver(&document).await;
        Ok(DocumentView::from(&document))
    }

    pub async fn approve(
        &self,
        actor: &ActorRef,
        id: &DocumentId,
        input: ApprovalInput,
    ) -> Result<DocumentView, WorkflowError> {
        let approver = self.actors.resolve(actor).await?;
        let mut document = self.load(id).await?;
        require_status(&document, DocumentStatus::InProgress, "approve")?;

        let index = document.current_index;
        self.require_current_decider(&document, &approver, "approve")?;

        let now = self.clock.now();
        document.approval_line = document
            .approval_line
            .iter()
            .enumerate()
            .map(|(i, step)| {
                if i == index {
                    step.decided(
                        StepDecision::Approved,
                        input.comment.clone(),
                        now,
                        input.signature_ref.clone(),
                    )
                } else {
                    step.clone()
                }
            })
            .collect();

        let finished = index + 1 >= document.approval_line.len();
        if finished {
            document.status = DocumentStatus::Approved;
            document.approved_by = Some(approver.username.clone());
            document.approved_at = Some(now);
        } else {
            document.current_index = index + 1;
        }

        let expected = document.version;
        self.stamp(&mut document, &approver);
        let document = self.persist_update(document, expected).await?;

        self.emit(
            &document,
            "workflow.approved",
            &approver.username,
            AuditOutcome::Success,
            &[("step", &index.to_string()), ("final", &finished.to_string())],
        );

        if finished {
            self.run_post_approval_hook(&document).await;
            self.notify_author_complete(&document, &approver.display_name).await;
        } else {
            self.notify_current_approver(&document).await;
        }
        Ok(DocumentView::from(&document))
    }

    pub async fn reject(
        &self,
        actor: &ActorRef,
        id: &DocumentId,
        reason: String,
    ) -> Result<DocumentView, WorkflowError> {
        let approver = self.actors.resolve(actor).await?;
        let mut document = self.load(id).await?;
        require_status(&document, DocumentStatus::InProgress, "reject")?;
        self.require_current_decider(&document, &approver, "reject")?;

        let index = document.current_index;
        let now = self.clock.now();
        document.approval_line = document
            .approval_line
            .iter()
            .enumerate()
            .map(|(i, step)| {
                if i == index {
                    step.decided(StepDecision::Rejected, reason.clone(), now, None)
                } else {
                    step.clone()
                }
            })
            .collect();
        document.status = DocumentStatus::Rejected;
        document.rejected_by = Some(approver.username.clone());
        document.rejected_reason = Some(reason.clone());
        document.rejected_at = Some(now);

        let expected = document.version;
        self.stamp(&mut document, &approver);
        let document = self.persist_update(document, expected).await?;

        self.emit(
            &document,
            "workflow.rejected",
            &approver.username,
            AuditOutcome::Success,
            &[("step", &index.to_string())],
        );
        self.notify_author_reject(&document, &approver.display_name, &reason).await;
        Ok(DocumentView::from(&document))
    }

    pub async fn resubmit(
        &self,
        actor: &ActorRef,
        id: &DocumentId,
        request: ResubmitRequest,
    ) -> Result<DocumentView, WorkflowError> {
        let author = self.actors.resolve(actor).await?;
        let mut document = self.load(id).await?;
        require_status(&document, DocumentStatus::Rejected, "resubmit")?;
        if document.author_id != author.username {
            return Err(WorkflowError::Unauthorized(format!(
                "only the original author may resubmit `{}`",
                document.id
            )));
        }

        let now = self.clock.now();

        // The rejection history is not retained on the steps; the new cycle
        // starts from a fully pending chain.
        document.approval_line =
            document.approval_line.iter().map(|step| step.reset()).collect();
        document.current_index = 0;
        document.rejected_by = None;
        document.rejected_reason = None;
        document.rejected_at = None;

        let orphans = self.documents.orphan_attachments_for(&author.username).await?;
        let reconciled = self
            .reconciler
            .reconcile(ReconcileRequest {
                document_id: &document.id,
                uploaded_by: &author.username,
                current: &document.attachments,
                retained_ids: &request.retained_attachment_ids,
                new_uploads: request.new_uploads,
                orphans,
                now,
            })
            .await?;
        document.attachments = reconciled;

        document.title = request.title;
        document.content = request.content;
        document.status = DocumentStatus::InProgress;

        let expected = document.version;
        self.stamp(&mut document, &author);
        let document = self.persist_update(document, expected).await?;

        self.emit(&document, "workflow.resubmitted", &author.username, AuditOutcome::Success, &[]);
        self.notify_current_approver(&document).await;
        Ok(DocumentView::from(&document))
    }

    pub async fn logical_delete(
        &self,
        actor: &ActorRef,
        id: &DocumentId,
        reason: String,
    ) -> Result<DocumentView, WorkflowError> {
        let actor = self.actors.resolve(actor).await?;
        let mut document = self.load(id).await?;
        if !matches!(document.status, DocumentStatus::Draft | DocumentStatus::Rejected) {
            return Err(WorkflowError::InvalidState(format!(
                "cannot delete document `{}` in status `{}`",
                document.id,
                document.status.as_str()
            )));
        }
        if document.author_id != actor.username && !actor.admin {
            return Err(WorkflowError::Unauthorized(format!(
                "only the author or an administrator may delete `{}`",
                document.id
            )));
        }

        document.status = DocumentStatus::Deleted;
        document.current_index = 0;
        document.deleted_by = Some(actor.username.clone());
        document.deleted_reason = Some(reason);
        document.deleted_at = Some(self.clock.now());

        let expected = document.version;
        self.stamp(&mut document, &actor);
        let document = self.persist_update(document, expected).await?;

        self.emit(&document, "workflow.deleted", &actor.username, AuditOutcome::Success, &[]);
        Ok(DocumentView::from(&document))
    }

    pub async fn force_approve(
        &self,
        actor: &ActorRef,
        id: &DocumentId,
        reason: String,
    ) -> Result<DocumentView, WorkflowError> {
        let admin = self.require_admin(actor).await?;
        let mut document = self.load(id).await?;
        require_status(&document, DocumentStatus::InProgress, "force-approve")?;

        let now = self.clock.now();
        // Undecided steps are closed out with the override reason so an
        // approved document never carries pending steps.
        document.approval_line = document
            .approval_line
            .iter()
            .map(|step| {
                if step.decision == StepDecision::Pending {
                    step.decided(StepDecision::Approved, reason.clone(), now, None)
                } else {
                    step.clone()
                }
            })
            .collect();
        document.status = DocumentStatus::Approved;
        document.current_index = document.approval_line.len();
        document.approved_by = Some(format!("{} {}", admin.username, OVERRIDE_MARKER));
        document.approved_at = Some(now);
        document.rejected_by = None;
        document.rejected_reason = None;
        document.rejected_at = None;

        let expected = document.version;
        self.stamp(&mut document, &admin);
        let document = self.persist_update(document, expected).await?;

        self.emit(
            &document,
            "workflow.force_approved",
            &admin.username,
            AuditOutcome::Success,
            &[("reason", &reason)],
        );
        self.run_post_approval_hook(&document).await;
        Ok(DocumentView::from(&document))
    }

    pub async fn force_reject(
        &self,
        actor: &ActorRef,
        id: &DocumentId,
        reason: String,
    ) -> Result<DocumentView, WorkflowError> {
        let admin = self.require_admin(actor).await?;
        let mut document = self.load(id).await?;
        require_status(&document, DocumentStatus::InProgress, "force-reject")?;

        let index = document.current_index;
        let now = self.clock.now();
        document.approval_line = document
            .approval_line
            .iter()
            .enumerate()
            .map(|(i, step)| {
                if i == index {
                    step.decided(StepDecision::Rejected, reason.clone(), now, None)
                } else {
                    step.clone()
                }
            })
            .collect();
        document.status = DocumentStatus::Rejected;
        document.rejected_by = Some(format!("{} {}", admin.username, OVERRIDE_MARKER));
        document.rejected_reason = Some(reason.clone());
        document.rejected_at = Some(now);

        let expected = document.version;
        self.stamp(&mut document, &admin);
        let document = self.persist_update(document, expected).await?;

        self.emit(
            &document,
            "workflow.force_rejected",
            &admin.username,
            AuditOutcome::Success,
            &[("reason", &reason)],
        );
        Ok(DocumentView::from(&document))
    }

    // ---- read surface -----------------------------------------------------

    pub async fn get(&self, id: &DocumentId) -> Result<DocumentView, WorkflowError> {
        let document = self.load(id).await?;
        Ok(DocumentView::from(&document))
    }

    pub async fn list(&self, page: PageRequest) -> Result<Page<DocumentView>, WorkflowError> {
        Ok(self.documents.list(page).await?.map(|d| DocumentView::from(&d)))
    }

    pub async fn list_by_status(
        &self,
        status: DocumentStatus,
        page: PageRequest,
    ) -> Result<Page<DocumentView>, WorkflowError> {
        Ok(self.documents.list_by_status(status, page).await?.map(|d| DocumentView::from(&d)))
    }

    pub async fn list_accessible(
        &self,
        actor: &ActorRef,
        page: PageRequest,
    ) -> Result<Page<DocumentView>, WorkflowError> {
        let user = self.actors.resolve(actor).await?;
        Ok(self
            .documents
            .list_accessible_to(&user.username, page)
            .await?
            .map(|d| DocumentView::from(&d)))
    }

    // ---- internals --------------------------------------------------------

    async fn create_document(
        &self,
        author: &Employee,
        request: NewDocument,
        status: DocumentStatus,
    ) -> Result<ApprovalDocument, WorkflowError> {
        let doc_type = request
            .doc_type
            .ok_or_else(|| WorkflowError::ValidationFailed("document type is required".into()))?;
        let department_code =
            request.department_code.unwrap_or_else(|| author.department_code.clone());

        let id = self.allocator.allocate(&department_code).await?;
        let approval_line = self.resolver.resolve(doc_type, &request.manual_chain).await?;

        let now = self.clock.now();
        let orphans = self.documents.orphan_attachments_for(&author.username).await?;
        let attachments = self
            .reconciler
            .reconcile(ReconcileRequest {
                document_id: &id,
                uploaded_by: &author.username,
                current: &[],
                retained_ids: &[],
                new_uploads: request.new_uploads,
                orphans,
                now,
            })
            .await?;

        let document = ApprovalDocument {
            id,
            doc_type,
            status,
            title: request.title,
            content: request.content,
            approval_line,
            current_index: 0,
            viewer_ids: request.viewer_ids.into_iter().collect(),
            attachments,
            author_id: author.username.clone(),
            author_name: author.display_name.clone(),
            department_id: author.department_id,
            department_code,
            created_by: author.username.clone(),
            created_at: now,
            updated_by: author.username.clone(),
            updated_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_reason: None,
            rejected_at: None,
            deleted_by: None,
            deleted_reason: None,
            deleted_at: None,
            version: 1,
        };
        document.verify_invariants().map_err(WorkflowError::InvalidState)?;
        self.documents.insert(&document).await?;
        Ok(document)
    }

    async fn load(&self, id: &DocumentId) -> Result<ApprovalDocument, WorkflowError> {
        self.documents
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("document `{id}` not found")))
    }

    async fn persist_update(
        &self,
        document: ApprovalDocument,
        expected_version: i64,
    ) -> Result<ApprovalDocument, WorkflowError> {
        document.verify_invariants().map_err(WorkflowError::InvalidState)?;
        self.documents.update(&document, expected_version).await?;
        Ok(document)
    }

    fn stamp(&self, document: &mut ApprovalDocument, actor: &Employee) {
        document.updated_by = actor.username.clone();
        document.updated_at = self.clock.now();
        document.version += 1;
    }

    async fn require_admin(&self, actor: &ActorRef) -> Result<Employee, WorkflowError> {
        let actor = self.actors.resolve(actor).await?;
        if !actor.admin {
            return Err(WorkflowError::Unauthorized(format!(
                "`{}` lacks administrator privileges for override operations",
                actor.username
            )));
        }
        Ok(actor)
    }

    fn require_current_decider(
        &self,
        document: &ApprovalDocument,
        actor: &Employee,
        operation: &str,
    ) -> Result<(), WorkflowError> {
        let step = document.current_step().ok_or_else(|| {
            WorkflowError::InvalidState(format!(
                "document `{}` has no current approver to {operation}",
                document.id
            ))
        })?;
        // Matching on display name in addition to the stable id reproduces
        // the long-standing behavior of the system this replaces; it is
        // flagged as a correctness risk, not a security feature.
        if !step.is_decider(&actor.username, &actor.display_name) {
            return Err(WorkflowError::Unauthorized(format!(
                "`{}` is not the current approver of `{}`",
                actor.username, document.id
            )));
        }
        Ok(())
    }

    fn emit(
        &self,
        document: &ApprovalDocument,
        event_type: &str,
        actor: &str,
        outcome: AuditOutcome,
        metadata: &[(&str, &str)],
    ) {
        let mut event = AuditEvent::new(
            Some(document.id.clone()),
            event_type,
            AuditCategory::Workflow,
            actor,
            outcome,
        )
        .with_metadata("status", document.status.as_str());
        for (key, value) in metadata {
            event = event.with_metadata(*key, *value);
        }
        self.audit.emit(event);
    }

    async fn run_post_approval_hook(&self, document: &ApprovalDocument) {
        if document.doc_type != DocType::ProjectPlan {
            return;
        }
        if let Err(error) =
            self.projects.project_approved(&document.id, &document.content).await
        {
            warn!(document_id = %document.id, %error, "project creation trigger failed");
            self.audit.emit(AuditEvent::new(
                Some(document.id.clone()),
                "workflow.project_trigger_failed",
                AuditCategory::Notification,
                "engine",
                AuditOutcome::Failed,
            ));
        }
    }

    async fn notify_current_approver(&self, document: &ApprovalDocument) {
        let Some(step) = document.current_step() else {
            return;
        };
        let approver = match self.directory.find_by_username(&step.approver_id).await {
            Ok(Some(approver)) => approver,
            Ok(None) => {
                warn!(
                    document_id = %document.id,
                    approver_id = %step.approver_id,
                    "current approver missing from directory; skipping notification"
                );
                return;
            }
            Err(error) => {
                warn!(document_id = %document.id, %error, "directory lookup failed; skipping notification");
                return;
            }
        };

        let note = ApprovalRequestNote {
            to_email: approver.email,
            to_name: approver.display_name,
            title: document.title.clone(),
            document_id: document.id.clone(),
            from_name: document.author_name.clone(),
        };
        if let Err(error) = self.notifier.send_approval_request(note).await {
            warn!(document_id = %document.id, %error, "approval request notification failed");
        }
    }

    async fn notify_author_complete(&self, document: &ApprovalDocument, from_name: &str) {
        let Some(author) = self.author_of(document).await else {
            return;
        };
        let note = ApprovalCompleteNote {
            to_email: author.email,
            to_name: author.display_name,
            title: document.title.clone(),
            document_id: document.id.clone(),
            from_name: from_name.to_owned(),
        };
        if let Err(error) = self.notifier.send_approval_complete(note).await {
            warn!(document_id = %document.id, %error, "approval complete notification failed");
        }
    }

    async fn notify_author_reject(
        &self,
        document: &ApprovalDocument,
        from_name: &str,
        reason: &str,
    ) {
        let Some(author) = self.author_of(document).await else {
            return;
        };
        let note = RejectNote {
            to_email: author.email,
            to_name: author.display_name,
            title: document.title.clone(),
            document_id: document.id.clone(),
            from_name: from_name.to_owned(),
            reason: reason.to_owned(),
        };
        if let Err(error) = self.notifier.send_reject(note).await {
            warn!(document_id = %document.id, %error, "reject notification failed");
        }
    }

    async fn author_of(&self, document: &ApprovalDocument) -> Option<Employee> {
        match self.directory.find_by_username(&document.author_id).await {
            Ok(Some(author)) => Some(author),
            Ok(None) => {
                warn!(
                    document_id = %document.id,
                    author_id = %document.author_id,
                    "author missing from directory; skipping notification"
                );
                None
            }
            Err(error) => {
                warn!(document_id = %document.id, %error, "directory lookup failed; skipping notification");
                None
            }
        }
    }
}

fn require_status(
    document: &ApprovalDocument,
    required: DocumentStatus,
    operation: &str,
) -> Result<(), WorkflowError> {
    if document.status != required {
        return Err(WorkflowError::InvalidState(format!(
            "cannot {operation} document `{}` in status `{}`",
            document.id,
            document.status.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::allocator::ManualClock;
    use crate::attachments::InMemoryFileStore;
    use crate::audit::InMemoryAuditSink;
    use crate::directory::{ActorRef, Employee, InMemoryDirectory};
    use crate::domain::attachment::{AttachmentId, AttachmentRef, UploadedFile};
    use crate::domain::document::{DocType, DocumentId, DocumentStatus};
    use crate::domain::step::StepDecision;
    use crate::errors::WorkflowError;
    use crate::notifications::{RecordingNotifier, RecordingProjectTrigger, SentNote};
    use crate::policy::{
        ApprovalPolicy, DepartmentRef, InMemoryPolicyStore, ManualStep, PolicyStep, PolicyStore,
    };
    use crate::store::{DocumentStore, InMemoryDocumentStore, PageRequest, StoreError};

    use super::{
        ApprovalInput, NewDocument, ResubmitRequest, SubmitRequest, WorkflowEngine,
        OVERRIDE_MARKER,
    };

    struct Harness {
        engine: WorkflowEngine,
        documents: Arc<InMemoryDocumentStore>,
        policies: Arc<InMemoryPolicyStore>,
        notifier: Arc<RecordingNotifier>,
        projects: Arc<RecordingProjectTrigger>,
        audit: InMemoryAuditSink,
    }

    fn employee(
        id: i64,
        username: &str,
        name: &str,
        dept_id: i64,
        dept: &str,
        position: &str,
        admin: bool,
    ) -> Employee {
        Employee {
            id,
            username: username.to_string(),
            display_name: name.to_string(),
            email: format!("{username}@example.com"),
            department_id: dept_id,
            department_code: dept.to_string(),
            position_code: position.to_string(),
            admin,
        }
    }

    async fn harness() -> Harness {
        harness_with_notifier(Arc::new(RecordingNotifier::default())).await
    }

    async fn harness_with_notifier(notifier: Arc<RecordingNotifier>) -> Harness {
        let directory = Arc::new(InMemoryDirectory::default());
        directory.add_employee(employee(1, "author1", "Park Dana", 1, "HR", "사원", false)).await;
        directory.add_employee(employee(2, "emp001", "Kim Jiwoo", 10, "X", "팀장", false)).await;
        directory.add_employee(employee(3, "emp002", "Lee Haneul", 20, "Y", "사원", false)).await;
        directory.add_employee(employee(4, "emp003", "Choi Minseo", 20, "Y", "팀장", false)).await;
        directory.add_employee(employee(9, "admin1", "Admin Cho", 1, "HR", "실장", true)).await;

        let documents = Arc::new(InMemoryDocumentStore::default());
        let policies = Arc::new(InMemoryPolicyStore::default());
        let projects = Arc::new(RecordingProjectTrigger::default());
        let audit = InMemoryAuditSink::default();
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).single().expect("timestamp"),
        ));

        let engine = WorkflowEngine::new(
            documents.clone(),
            documents.clone(),
            policies.clone(),
            directory,
            Arc::new(InMemoryFileStore::default()),
            notifier.clone(),
            projects.clone(),
            Arc::new(audit.clone()),
            clock,
        );

        Harness { engine, documents, policies, notifier, projects, audit }
    }

    fn author() -> ActorRef {
        ActorRef::username("author1")
    }

    fn one_step_request(doc_type: DocType) -> NewDocument {
        NewDocument {
            title: "Team offsite request".to_string(),
            doc_type: Some(doc_type),
            content: json!({ "body": "please approve" }),
            manual_chain: vec![ManualStep::new("emp001")],
            ..NewDocument::default()
        }
    }

    fn two_step_request() -> NewDocument {
        NewDocument {
            title: "Purchase request".to_string(),
            doc_type: Some(DocType::Purchase),
            content: json!({ "amount": 1200 }),
            manual_chain: vec![ManualStep::new("emp001"), ManualStep::new("emp002")],
            ..NewDocument::default()
        }
    }

    async fn stored(harness: &Harness, id: &str) -> crate::domain::document::ApprovalDocument {
        harness
            .documents
            .find_by_id(&DocumentId(id.to_string()))
            .await
            .expect("find")
            .expect("stored document")
    }

    #[tokio::test]
    async fn draft_allocates_id_and_persists_with_draft_status() {
        let harness = harness().await;
        let view = harness
            .engine
            .draft(&author(), one_step_request(DocType::Request))
            .await
            .expect("draft");

        assert_eq!(view.id, "HR-20250101-001");
        assert_eq!(view.status, DocumentStatus::Draft);
        assert_eq!(view.current_index, 0);
        assert_eq!(view.department_code, "HR");
        assert!(harness.notifier.sent().is_empty(), "draft must not notify anyone");

        let document = stored(&harness, "HR-20250101-001").await;
        document.verify_invariants().expect("invariants");
    }

    #[tokio::test]
    async fn active_policy_overrides_manual_chain_on_draft() {
        let harness = harness().await;
        harness
            .policies
            .save(ApprovalPolicy {
                id: 1,
                doc_type: DocType::Request,
                name: "request default".to_string(),
                active: true,
                steps: vec![
                    PolicyStep {
                        order: 0,
                        approver_id: None,
                        department: Some(DepartmentRef::Code("X".to_string())),
                        position_code: Some("팀장".to_string()),
                    },
                    PolicyStep {
                        order: 1,
                        approver_id: None,
                        department: Some(DepartmentRef::Code("Y".to_string())),
                        position_code: Some("사원".to_string()),
                    },
                ],
            })
            .await
            .expect("save policy");

        let view = harness
            .engine
            .draft(&author(), one_step_request(DocType::Request))
            .await
            .expect("draft");

        assert_eq!(view.approval_line.len(), 2);
        assert_eq!(view.approval_line[0].approver_id, "emp001");
        assert_eq!(view.approval_line[1].approver_id, "emp002");
        assert!(view.approval_line.iter().all(|s| s.decision == StepDecision::Pending));
    }

    #[tokio::test]
    async fn submit_then_single_approval_completes_and_notifies_author() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit");
        assert_eq!(view.status, DocumentStatus::InProgress);

        let id = DocumentId(view.id.clone());
        let approved = harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("approve");

        assert_eq!(approved.status, DocumentStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("emp001"));

        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], SentNote::ApprovalRequest(note) if note.to_email == "emp001@example.com"));
        assert!(matches!(&sent[1], SentNote::ApprovalComplete(note) if note.to_email == "author1@example.com"));

        stored(&harness, &view.id).await.verify_invariants().expect("invariants");
    }

    #[tokio::test]
    async fn intermediate_approval_advances_and_notifies_next_approver() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(two_step_request()))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        let advanced = harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("approve step 0");

        assert_eq!(advanced.status, DocumentStatus::InProgress);
        assert_eq!(advanced.current_index, 1);
        assert_eq!(advanced.approval_line[0].decision, StepDecision::Approved);
        assert_eq!(advanced.approval_line[1].decision, StepDecision::Pending);

        let sent = harness.notifier.sent();
        assert!(matches!(&sent[1], SentNote::ApprovalRequest(note) if note.to_email == "emp002@example.com"));

        stored(&harness, &view.id).await.verify_invariants().expect("invariants");
    }

    #[tokio::test]
    async fn reject_then_resubmit_resets_the_cycle() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        let rejected = harness
            .engine
            .reject(&ActorRef::username("emp001"), &id, "budget too high".to_string())
            .await
            .expect("reject");

        assert_eq!(rejected.status, DocumentStatus::Rejected);
        assert_eq!(rejected.rejected_reason.as_deref(), Some("budget too high"));
        assert_eq!(rejected.approval_line[0].decision, StepDecision::Rejected);
        assert!(matches!(
            harness.notifier.sent().last(),
            Some(SentNote::Reject(note)) if note.reason == "budget too high"
        ));

        let resubmitted = harness
            .engine
            .resubmit(
                &author(),
                &id,
                ResubmitRequest {
                    title: "Team offsite request v2".to_string(),
                    content: json!({ "body": "cheaper venue" }),
                    ..ResubmitRequest::default()
                },
            )
            .await
            .expect("resubmit");

        assert_eq!(resubmitted.status, DocumentStatus::InProgress);
        assert_eq!(resubmitted.current_index, 0);
        assert!(resubmitted.rejected_reason.is_none());
        assert!(resubmitted
            .approval_line
            .iter()
            .all(|s| s.decision == StepDecision::Pending && s.comment.is_empty()));
        assert_eq!(resubmitted.title, "Team offsite request v2");

        stored(&harness, &view.id).await.verify_invariants().expect("invariants");
    }

    #[tokio::test]
    async fn resubmit_by_non_author_is_unauthorized() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());
        harness
            .engine
            .reject(&ActorRef::username("emp001"), &id, "no".to_string())
            .await
            .expect("reject");

        let error = harness
            .engine
            .resubmit(&ActorRef::username("emp002"), &id, ResubmitRequest::default())
            .await
            .expect_err("must fail");
        assert!(matches!(error, WorkflowError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn force_approve_bypasses_identity_and_jumps_the_chain() {
        let harness = harness().await;
        let mut request = two_step_request();
        request.manual_chain.push(ManualStep::new("emp003"));
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(request))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("first approval");

        let forced = harness
            .engine
            .force_approve(&ActorRef::username("admin1"), &id, "emergency".to_string())
            .await
            .expect("force approve");

        assert_eq!(forced.status, DocumentStatus::Approved);
        assert_eq!(forced.current_index, 3);
        assert!(forced
            .approved_by
            .as_deref()
            .is_some_and(|by| by.starts_with("admin1") && by.ends_with(OVERRIDE_MARKER)));
        assert!(forced.approval_line.iter().all(|s| s.decision == StepDecision::Approved));

        stored(&harness, &view.id).await.verify_invariants().expect("invariants");
    }

    #[tokio::test]
    async fn force_operations_require_an_administrator() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        let error = harness
            .engine
            .force_approve(&ActorRef::username("emp002"), &id, "nope".to_string())
            .await
            .expect_err("non-admin");
        assert!(matches!(error, WorkflowError::Unauthorized(_)));

        let error = harness
            .engine
            .force_reject(&ActorRef::username("emp002"), &id, "nope".to_string())
            .await
            .expect_err("non-admin");
        assert!(matches!(error, WorkflowError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn force_reject_marks_exactly_one_step_rejected() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(two_step_request()))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        let forced = harness
            .engine
            .force_reject(&ActorRef::username("admin1"), &id, "procurement freeze".to_string())
            .await
            .expect("force reject");

        assert_eq!(forced.status, DocumentStatus::Rejected);
        assert_eq!(forced.rejected_reason.as_deref(), Some("procurement freeze"));
        assert!(forced
            .rejected_by
            .as_deref()
            .is_some_and(|by| by.ends_with(OVERRIDE_MARKER)));

        stored(&harness, &view.id).await.verify_invariants().expect("invariants");
    }

    #[tokio::test]
    async fn stale_approver_cannot_reapply_after_chain_advanced() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(two_step_request()))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("first approval");

        let error = harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect_err("second approval by the same actor must fail");
        assert!(matches!(error, WorkflowError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn display_name_match_is_accepted_for_the_current_step() {
        // Observed (and flagged) behavior: the identity check also passes
        // when the actor's display name matches the step's approver name,
        // even though the usernames differ.
        let harness = harness().await;
        let mut request = one_step_request(DocType::Request);
        request.manual_chain = vec![ManualStep {
            approver_id: "emp999".to_string(),
            approver_name: Some("Lee Haneul".to_string()),
        }];

        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(request))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        let error = harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect_err("neither id nor name matches");
        assert!(matches!(error, WorkflowError::Unauthorized(_)));

        // emp002's display name is "Lee Haneul".
        let approved = harness
            .engine
            .approve(&ActorRef::username("emp002"), &id, ApprovalInput::default())
            .await
            .expect("name match passes the identity check");
        assert_eq!(approved.status, DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn approve_outside_in_progress_is_invalid_state() {
        let harness = harness().await;
        let view = harness
            .engine
            .draft(&author(), one_step_request(DocType::Request))
            .await
            .expect("draft");
        let id = DocumentId(view.id.clone());

        let error = harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect_err("draft cannot be approved");
        assert!(matches!(error, WorkflowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn submit_existing_draft_keeps_id_and_chain() {
        let harness = harness().await;
        let drafted = harness
            .engine
            .draft(&author(), two_step_request())
            .await
            .expect("draft");
        let id = DocumentId(drafted.id.clone());

        let submitted = harness
            .engine
            .submit(&author(), SubmitRequest::ExistingDraft(id.clone()))
            .await
            .expect("submit draft");

        assert_eq!(submitted.id, drafted.id);
        assert_eq!(submitted.status, DocumentStatus::InProgress);
        assert_eq!(submitted.approval_line, drafted.approval_line);
        assert!(matches!(
            harness.notifier.sent().first(),
            Some(SentNote::ApprovalRequest(note)) if note.to_email == "emp001@example.com"
        ));
    }

    #[tokio::test]
    async fn logical_delete_allowed_only_from_draft_or_rejected() {
        let harness = harness().await;
        let drafted = harness
            .engine
            .draft(&author(), one_step_request(DocType::Request))
            .await
            .expect("draft");
        let draft_id = DocumentId(drafted.id.clone());

        let deleted = harness
            .engine
            .logical_delete(&author(), &draft_id, "made in error".to_string())
            .await
            .expect("delete draft");
        assert_eq!(deleted.status, DocumentStatus::Deleted);
        assert_eq!(deleted.current_index, 0);

        let submitted = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit");
        let in_progress_id = DocumentId(submitted.id.clone());

        let error = harness
            .engine
            .logical_delete(&author(), &in_progress_id, "oops".to_string())
            .await
            .expect_err("in-progress documents cannot be deleted");
        assert!(matches!(error, WorkflowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn project_plan_approval_fires_the_project_trigger() {
        let harness = harness().await;
        let content = json!({ "project": { "name": "Atlas" } });
        let mut request = one_step_request(DocType::ProjectPlan);
        request.content = content.clone();

        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(request))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("approve");

        let invocations = harness.projects.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, id);
        assert_eq!(invocations[0].1, content);
    }

    #[tokio::test]
    async fn non_project_doc_types_never_fire_the_trigger() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Expense)))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());

        harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("approve");

        assert!(harness.projects.invocations().is_empty());
    }

    #[tokio::test]
    async fn notification_outage_never_fails_the_operation() {
        let harness = harness_with_notifier(Arc::new(RecordingNotifier::failing())).await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit despite notifier outage");

        let id = DocumentId(view.id.clone());
        let approved = harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("approve despite notifier outage");
        assert_eq!(approved.status, DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn orphan_uploads_are_linked_on_creation() {
        let harness = harness().await;
        let orphan = AttachmentRef {
            id: AttachmentId("orphan-1".to_string()),
            document_id: None,
            file_name: "forecast.xlsx".to_string(),
            stored_ref: "stored-orphan-1".to_string(),
            content_type: "application/vnd.ms-excel".to_string(),
            size_bytes: 64,
            uploaded_by: "author1".to_string(),
            uploaded_at: Utc::now(),
        };
        harness.documents.save_orphan(&orphan).await.expect("save orphan");

        let mut request = one_step_request(DocType::Request);
        request.new_uploads = vec![UploadedFile {
            file_name: "summary.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![1, 2, 3],
        }];

        let view = harness.engine.draft(&author(), request).await.expect("draft");

        assert_eq!(view.attachments.len(), 2);
        let linked = view
            .attachments
            .iter()
            .find(|a| a.id.0 == "orphan-1")
            .expect("orphan linked onto the document");
        assert_eq!(linked.document_id.as_ref().map(|d| d.0.as_str()), Some(view.id.as_str()));
    }

    #[tokio::test]
    async fn resubmit_reconciles_retained_new_and_orphan_attachments() {
        let harness = harness().await;
        let mut request = one_step_request(DocType::Request);
        request.new_uploads = vec![UploadedFile {
            file_name: "budget-v1.xlsx".to_string(),
            content_type: "application/vnd.ms-excel".to_string(),
            bytes: vec![1, 2, 3],
        }];

        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(request))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());
        let retained_id = view.attachments[0].id.clone();

        harness
            .engine
            .reject(&ActorRef::username("emp001"), &id, "budget too high".to_string())
            .await
            .expect("reject");

        // Uploaded while revising the rejected document, before resubmit.
        let orphan = AttachmentRef {
            id: AttachmentId("orphan-2".to_string()),
            document_id: None,
            file_name: "quotes.pdf".to_string(),
            stored_ref: "stored-orphan-2".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 128,
            uploaded_by: "author1".to_string(),
            uploaded_at: Utc::now(),
        };
        harness.documents.save_orphan(&orphan).await.expect("save orphan");

        let resubmitted = harness
            .engine
            .resubmit(
                &author(),
                &id,
                ResubmitRequest {
                    title: "Team offsite request v2".to_string(),
                    content: json!({ "body": "cheaper venue" }),
                    retained_attachment_ids: vec![retained_id.clone()],
                    new_uploads: vec![UploadedFile {
                        file_name: "budget-v2.xlsx".to_string(),
                        content_type: "application/vnd.ms-excel".to_string(),
                        bytes: vec![4, 5, 6],
                    }],
                },
            )
            .await
            .expect("resubmit");

        assert_eq!(resubmitted.attachments.len(), 3);
        assert!(resubmitted.attachments.iter().any(|a| a.id == retained_id));
        assert!(resubmitted.attachments.iter().any(|a| a.file_name == "budget-v2.xlsx"));
        let relinked = resubmitted
            .attachments
            .iter()
            .find(|a| a.id.0 == "orphan-2")
            .expect("pending orphan linked on resubmit");
        assert_eq!(relinked.document_id.as_ref().map(|d| d.0.as_str()), Some(view.id.as_str()));

        let leftover = harness
            .documents
            .orphan_attachments_for("author1")
            .await
            .expect("orphan query");
        assert!(leftover.is_empty(), "linking must consume the orphan pool");
    }

    #[tokio::test]
    async fn conflicting_writers_are_rejected_by_version_check() {
        let harness = harness().await;
        let view = harness
            .engine
            .draft(&author(), one_step_request(DocType::Request))
            .await
            .expect("draft");
        let id = DocumentId(view.id.clone());

        let mut first = stored(&harness, &view.id).await;
        let mut second = first.clone();

        first.title = "writer one".to_string();
        first.version += 1;
        harness.documents.update(&first, view.version).await.expect("first writer wins");

        second.title = "writer two".to_string();
        second.version += 1;
        let error = harness
            .documents
            .update(&second, view.version)
            .await
            .expect_err("second writer conflicts");
        assert_eq!(error, StoreError::VersionConflict(id.0.clone()));
    }

    #[tokio::test]
    async fn listing_filters_by_status_and_visibility() {
        let harness = harness().await;
        harness
            .engine
            .draft(&author(), one_step_request(DocType::Request))
            .await
            .expect("draft");
        let submitted = harness
            .engine
            .submit(&author(), SubmitRequest::New(two_step_request()))
            .await
            .expect("submit");

        let in_progress = harness
            .engine
            .list_by_status(DocumentStatus::InProgress, PageRequest::default())
            .await
            .expect("list by status");
        assert_eq!(in_progress.total, 1);
        assert_eq!(in_progress.items[0].id, submitted.id);

        let all = harness.engine.list(PageRequest::default()).await.expect("list");
        assert_eq!(all.total, 2);

        // emp002 sees only the document where they appear in the chain.
        let theirs = harness
            .engine
            .list_accessible(&ActorRef::username("emp002"), PageRequest::default())
            .await
            .expect("accessible");
        assert_eq!(theirs.total, 1);
        assert_eq!(theirs.items[0].id, submitted.id);

        // The author sees both.
        let mine = harness
            .engine
            .list_accessible(&author(), PageRequest::default())
            .await
            .expect("accessible");
        assert_eq!(mine.total, 2);
    }

    #[tokio::test]
    async fn operations_emit_audit_events() {
        let harness = harness().await;
        let view = harness
            .engine
            .submit(&author(), SubmitRequest::New(one_step_request(DocType::Request)))
            .await
            .expect("submit");
        let id = DocumentId(view.id.clone());
        harness
            .engine
            .approve(&ActorRef::username("emp001"), &id, ApprovalInput::default())
            .await
            .expect("approve");

        let events = harness.audit.events();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"workflow.submitted"));
        assert!(types.contains(&"workflow.approved"));
    }

    #[tokio::test]
    async fn missing_doc_type_fails_validation() {
        let harness = harness().await;
        let mut request = one_step_request(DocType::Request);
        request.doc_type = None;

        let error = harness.engine.draft(&author(), request).await.expect_err("must fail");
        assert!(matches!(error, WorkflowError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let harness = harness().await;
        let error = harness
            .engine
            .get(&DocumentId("HR-19990101-001".to_string()))
            .await
            .expect_err("unknown id");
        assert!(matches!(error, WorkflowError::NotFound(_)));
    }
}
