//! Error taxonomy shared by the business modules.

use crate::blob_store::BlobError;
use crate::core_state::CoreError;
use crate::db::DatabaseError;
use crate::models::enums::AuditResult;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Missing or malformed input, rejected before any mutation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Absent, soft-deleted, or not visible to the caller. Deliberately
    /// carries no detail.
    #[error("Not found")]
    NotFound,

    /// Visible resource, wrong role or ownership.
    #[error("Operation not permitted")]
    Forbidden,

    /// An atomic conditional update found the entity in another state.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] CoreError),

    #[error("Blob storage error: {0}")]
    Storage(#[from] BlobError),
}

impl From<DatabaseError> for DomainError {
    fn from(err: DatabaseError) -> Self {
        Self::Persistence(CoreError::Database(err))
    }
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short machine-readable kind, safe to store in audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "persistence",
            Self::Storage(_) => "storage",
        }
    }

    /// Audit outcome for a failed attempt.
    pub fn audit_result(&self) -> AuditResult {
        match self {
            Self::Forbidden => AuditResult::Restricted,
            _ => AuditResult::Failed,
        }
    }
}
