use chrono::{DateTime, Utc};

use docflow_core::store::StoreError;

pub mod directory;
pub mod document;
pub mod policy;

pub use directory::SqlPeopleDirectory;
pub use document::SqlDocumentStore;
pub use policy::SqlPolicyStore;

pub(crate) fn db_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

pub(crate) fn decode_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("decode error: {error}"))
}

/// Timestamps are stored as RFC 3339 text. A malformed value degrades to the
/// current time rather than failing the whole read.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
