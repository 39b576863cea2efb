use serde::Serialize;

use docflow_core::notifications::{ApprovalCompleteNote, ApprovalRequestNote, RejectNote};

/// One outbound mail, ready for the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    pub fn approval_request(note: &ApprovalRequestNote) -> Self {
        Self {
            to_email: note.to_email.clone(),
            to_name: note.to_name.clone(),
            subject: format!("[Approval requested] {} ({})", note.title, note.document_id),
            body: format!(
                "{to},\n\n{from} has requested your approval on \"{title}\" ({id}).\n\
                 The document is waiting at your step of the approval chain.\n",
                to = note.to_name,
                from = note.from_name,
                title = note.title,
                id = note.document_id,
            ),
        }
    }

    pub fn approval_complete(note: &ApprovalCompleteNote) -> Self {
        Self {
            to_email: note.to_email.clone(),
            to_name: note.to_name.clone(),
            subject: format!("[Approved] {} ({})", note.title, note.document_id),
            body: format!(
                "{to},\n\n\"{title}\" ({id}) has completed its approval chain.\n\
                 Final approval by {from}.\n",
                to = note.to_name,
                title = note.title,
                id = note.document_id,
                from = note.from_name,
            ),
        }
    }

    pub fn reject(note: &RejectNote) -> Self {
        Self {
            to_email: note.to_email.clone(),
            to_name: note.to_name.clone(),
            subject: format!("[Rejected] {} ({})", note.title, note.document_id),
            body: format!(
                "{to},\n\n\"{title}\" ({id}) was rejected by {from}.\n\nReason: {reason}\n\n\
                 You can revise the document and resubmit it.\n",
                to = note.to_name,
                title = note.title,
                id = note.document_id,
                from = note.from_name,
                reason = note.reason,
            ),
        }
    }
}
