use thiserror::Error;

use crate::store::StoreError;

/// Business failure taxonomy for workflow operations. Each variant carries a
/// human-readable message; the boundary maps them onto `InterfaceError`
/// without leaking internals.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("integrity conflict: {0}")]
    IntegrityConflict(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(entity) => Self::NotFound(entity),
            StoreError::VersionConflict(entity) => Self::IntegrityConflict(format!(
                "document `{entity}` was modified concurrently; reload and retry"
            )),
            StoreError::Backend(message) => Self::Storage(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested document does not exist.",
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::Conflict { .. } => {
                "The document was changed by someone else. Reload it and retry."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Conflicts are the one class a caller is expected to retry after
    /// reloading; everything else is a terminal answer for that request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl WorkflowError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            WorkflowError::ValidationFailed(message) | WorkflowError::InvalidState(message) => {
                Self::BadRequest { message, correlation_id: unassigned }
            }
            WorkflowError::NotFound(message) => {
                Self::NotFound { message, correlation_id: unassigned }
            }
            WorkflowError::Unauthorized(message) => {
                Self::Forbidden { message, correlation_id: unassigned }
            }
            WorkflowError::IntegrityConflict(message) => {
                Self::Conflict { message, correlation_id: unassigned }
            }
            WorkflowError::Storage(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}
