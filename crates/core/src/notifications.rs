use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::document::DocumentId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalRequestNote {
    pub to_email: String,
    pub to_name: String,
    pub title: String,
    pub document_id: DocumentId,
    pub from_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalCompleteNote {
    pub to_email: String,
    pub to_name: String,
    pub title: String,
    pub document_id: DocumentId,
    pub from_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectNote {
    pub to_email: String,
    pub to_name: String,
    pub title: String,
    pub document_id: DocumentId,
    pub from_name: String,
    pub reason: String,
}

/// Notification port. Every send is fire-and-forget from the engine's point
/// of view: failures are logged, never propagated, and never roll a workflow
/// operation back.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_approval_request(&self, note: ApprovalRequestNote) -> Result<(), NotifyError>;

    async fn send_approval_complete(&self, note: ApprovalCompleteNote) -> Result<(), NotifyError>;

    async fn send_reject(&self, note: RejectNote) -> Result<(), NotifyError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentNote {
    ApprovalRequest(ApprovalRequestNote),
    ApprovalComplete(ApprovalCompleteNote),
    Reject(RejectNote),
}

/// Test double that records every note, optionally failing each send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNote>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: Mutex::new(true) }
    }

    pub fn sent(&self) -> Vec<SentNote> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, note: SentNote) -> Result<(), NotifyError> {
        let failing = match self.fail.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if failing {
            return Err(NotifyError("simulated outage".to_owned()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(note),
            Err(poisoned) => poisoned.into_inner().push(note),
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_approval_request(&self, note: ApprovalRequestNote) -> Result<(), NotifyError> {
        self.record(SentNote::ApprovalRequest(note))
    }

    async fn send_approval_complete(&self, note: ApprovalCompleteNote) -> Result<(), NotifyError> {
        self.record(SentNote::ApprovalComplete(note))
    }

    async fn send_reject(&self, note: RejectNote) -> Result<(), NotifyError> {
        self.record(SentNote::Reject(note))
    }
}

/// Project-creation collaborator, invoked only when a `ProjectPlan` document
/// reaches approval. Receives the document's opaque content verbatim.
#[async_trait]
pub trait ProjectTrigger: Send + Sync {
    async fn project_approved(
        &self,
        document_id: &DocumentId,
        content: &serde_json::Value,
    ) -> Result<(), String>;
}

#[derive(Default)]
pub struct RecordingProjectTrigger {
    invocations: Mutex<Vec<(DocumentId, serde_json::Value)>>,
}

impl RecordingProjectTrigger {
    pub fn invocations(&self) -> Vec<(DocumentId, serde_json::Value)> {
        match self.invocations.lock() {
            Ok(invocations) => invocations.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ProjectTrigger for RecordingProjectTrigger {
    async fn project_approved(
        &self,
        document_id: &DocumentId,
        content: &serde_json::Value,
    ) -> Result<(), String> {
        match self.invocations.lock() {
            Ok(mut invocations) => invocations.push((document_id.clone(), content.clone())),
            Err(poisoned) => poisoned.into_inner().push((document_id.clone(), content.clone())),
        }
        Ok(())
    }
}

/// No-op trigger for doc types that never create projects, and for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProjectTrigger;

#[async_trait]
impl ProjectTrigger for NoopProjectTrigger {
    async fn project_approved(
        &self,
        _document_id: &DocumentId,
        _content: &serde_json::Value,
    ) -> Result<(), String> {
        Ok(())
    }
}
