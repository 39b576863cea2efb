use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::attachment::AttachmentRef;
use crate::domain::step::{ApproverStep, StepDecision};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed document-type tag set. Drives policy lookup and the single
/// post-approval side effect (`ProjectPlan` triggers project creation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Request,
    ProjectPlan,
    Expense,
    Purchase,
    Leave,
    Resign,
    HrMove,
    EstimateProposal,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::ProjectPlan => "project_plan",
            Self::Expense => "expense",
            Self::Purchase => "purchase",
            Self::Leave => "leave",
            Self::Resign => "resign",
            Self::HrMove => "hr_move",
            Self::EstimateProposal => "estimate_proposal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "request" => Some(Self::Request),
            "project_plan" => Some(Self::ProjectPlan),
            "expense" => Some(Self::Expense),
            "purchase" => Some(Self::Purchase),
            "leave" => Some(Self::Leave),
            "resign" => Some(Self::Resign),
            "hr_move" => Some(Self::HrMove),
            "estimate_proposal" => Some(Self::EstimateProposal),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::ProjectPlan => "Project plan",
            Self::Expense => "Expense",
            Self::Purchase => "Purchase",
            Self::Leave => "Leave",
            Self::Resign => "Resignation",
            Self::HrMove => "HR transfer",
            Self::EstimateProposal => "Estimate proposal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    InProgress,
    Rejected,
    Approved,
    Archived,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Rejected => "rejected",
            Self::Approved => "approved",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "in_progress" => Some(Self::InProgress),
            "rejected" => Some(Self::Rejected),
            "approved" => Some(Self::Approved),
            "archived" => Some(Self::Archived),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::InProgress => "In progress",
            Self::Rejected => "Rejected",
            Self::Approved => "Approved",
            Self::Archived => "Archived",
            Self::Deleted => "Deleted",
        }
    }

    /// Terminal states admit no further workflow transitions. `Rejected` is
    /// semi-terminal: it is recoverable through resubmit by the author.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Archived | Self::Deleted)
    }
}

/// The aggregate root of the approval workflow. `content` is an opaque body
/// owned by the caller; the engine never interprets it beyond passing it to
/// the project-creation trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDocument {
    pub id: DocumentId,
    pub doc_type: DocType,
    pub status: DocumentStatus,
    pub title: String,
    pub content: serde_json::Value,
    pub approval_line: Vec<ApproverStep>,
    pub current_index: usize,
    pub viewer_ids: BTreeSet<String>,
    pub attachments: Vec<AttachmentRef>,
    pub author_id: String,
    pub author_name: String,
    pub department_id: i64,
    pub department_code: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub deleted_reason: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl ApprovalDocument {
    pub fn current_step(&self) -> Option<&ApproverStep> {
        self.approval_line.get(self.current_index)
    }

    /// Structural invariant check used by tests and by the engine before
    /// persisting a transition.
    pub fn verify_invariants(&self) -> Result<(), String> {
        if self.status != DocumentStatus::Draft && self.approval_line.is_empty() {
            return Err(format!(
                "document {} has status {:?} but an empty approval line",
                self.id, self.status
            ));
        }

        if self.status == DocumentStatus::InProgress {
            if self.current_index >= self.approval_line.len() {
                return Err(format!(
                    "document {} current index {} is outside its {}-step chain",
                    self.id,
                    self.current_index,
                    self.approval_line.len()
                ));
            }
            for step in &self.approval_line[..self.current_index] {
                if step.decision != StepDecision::Approved {
                    return Err(format!(
                        "document {} step {} precedes the current step but is {:?}",
                        self.id, step.order, step.decision
                    ));
                }
            }
        }

        if self.status == DocumentStatus::Approved
            && self.approval_line.iter().any(|step| step.decision != StepDecision::Approved)
        {
            return Err(format!("document {} is approved with undecided steps", self.id));
        }

        if self.status == DocumentStatus::Rejected {
            let rejected =
                self.approval_line.iter().filter(|s| s.decision == StepDecision::Rejected).count();
            if rejected != 1 {
                return Err(format!(
                    "document {} is rejected but carries {rejected} rejected steps",
                    self.id
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use crate::domain::step::{ApproverStep, StepDecision};

    use super::{ApprovalDocument, DocType, DocumentId, DocumentStatus};

    pub(crate) fn document(status: DocumentStatus, line: Vec<ApproverStep>) -> ApprovalDocument {
        let now = Utc::now();
        ApprovalDocument {
            id: DocumentId("HR-20250101-001".to_string()),
            doc_type: DocType::Request,
            status,
            title: "Team offsite request".to_string(),
            content: serde_json::json!({ "body": "offsite" }),
            approval_line: line,
            current_index: 0,
            viewer_ids: BTreeSet::new(),
            attachments: Vec::new(),
            author_id: "author1".to_string(),
            author_name: "Park Dana".to_string(),
            department_id: 1,
            department_code: "HR".to_string(),
            created_by: "author1".to_string(),
            created_at: now,
            updated_by: "author1".to_string(),
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
        }
    }

    #[test]
    fn in_progress_requires_index_inside_chain() {
        let mut doc = document(
            DocumentStatus::InProgress,
            vec![ApproverStep::pending(0, "emp001", "Kim Jiwoo")],
        );
        assert!(doc.verify_invariants().is_ok());

        doc.current_index = 1;
        assert!(doc.verify_invariants().is_err());
    }

    #[test]
    fn passed_over_undecided_step_is_rejected_by_checker() {
        let mut doc = document(
            DocumentStatus::InProgress,
            vec![
                ApproverStep::pending(0, "emp001", "Kim Jiwoo"),
                ApproverStep::pending(1, "emp002", "Lee Haneul"),
            ],
        );
        doc.current_index = 1;

        assert!(doc.verify_invariants().is_err());

        doc.approval_line[0] =
            doc.approval_line[0].decided(StepDecision::Approved, "", Utc::now(), None);
        assert!(doc.verify_invariants().is_ok());
    }

    #[test]
    fn rejected_status_requires_exactly_one_rejected_step() {
        let now = Utc::now();
        let doc = document(
            DocumentStatus::Rejected,
            vec![
                ApproverStep::pending(0, "emp001", "Kim Jiwoo")
                    .decided(StepDecision::Rejected, "no", now, None),
            ],
        );
        assert!(doc.verify_invariants().is_ok());

        let doc = document(
            DocumentStatus::Rejected,
            vec![ApproverStep::pending(0, "emp001", "Kim Jiwoo")],
        );
        assert!(doc.verify_invariants().is_err());
    }

    #[test]
    fn non_draft_documents_need_a_chain() {
        let doc = document(DocumentStatus::InProgress, Vec::new());
        assert!(doc.verify_invariants().is_err());

        let doc = document(DocumentStatus::Draft, Vec::new());
        assert!(doc.verify_invariants().is_ok());
    }

    #[test]
    fn tag_string_round_trips() {
        assert_eq!(DocType::parse("project_plan"), Some(DocType::ProjectPlan));
        assert_eq!(DocType::parse("unknown"), None);
        assert_eq!(DocumentStatus::parse("in_progress"), Some(DocumentStatus::InProgress));
        assert_eq!(DocumentStatus::InProgress.as_str(), "in_progress");
        assert!(DocumentStatus::Approved.is_terminal());
        assert!(!DocumentStatus::Rejected.is_terminal());
    }
}
