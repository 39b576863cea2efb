use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDecision {
    Pending,
    Approved,
    Rejected,
}

impl StepDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// One position in a document's approval chain. Steps are immutable values:
/// every transition rebuilds the whole chain instead of mutating a step in
/// place, so a prior decision is never silently overwritten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApproverStep {
    pub order: u32,
    pub approver_id: String,
    pub approver_name: String,
    pub decision: StepDecision,
    pub comment: String,
    pub decided_at: Option<DateTime<Utc>>,
    pub signature_ref: Option<String>,
}

impl ApproverStep {
    pub fn pending(order: u32, approver_id: impl Into<String>, approver_name: impl Into<String>) -> Self {
        Self {
            order,
            approver_id: approver_id.into(),
            approver_name: approver_name.into(),
            decision: StepDecision::Pending,
            comment: String::new(),
            decided_at: None,
            signature_ref: None,
        }
    }

    /// Fresh pending copy preserving order and approver identity. Used by
    /// resubmit, which discards the prior cycle's decisions.
    pub fn reset(&self) -> Self {
        Self::pending(self.order, self.approver_id.clone(), self.approver_name.clone())
    }

    pub fn decided(
        &self,
        decision: StepDecision,
        comment: impl Into<String>,
        decided_at: DateTime<Utc>,
        signature_ref: Option<String>,
    ) -> Self {
        Self {
            order: self.order,
            approver_id: self.approver_id.clone(),
            approver_name: self.approver_name.clone(),
            decision,
            comment: comment.into(),
            decided_at: Some(decided_at),
            signature_ref,
        }
    }

    /// Current-approver identity check: a match on the stable identifier or
    /// on the display name both pass. See the workflow engine docs for why
    /// the name match is kept.
    pub fn is_decider(&self, actor_id: &str, actor_name: &str) -> bool {
        self.approver_id == actor_id || self.approver_name == actor_name
    }
}
