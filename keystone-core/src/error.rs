use thiserror::Error;

use crate::store::StoreError;

/// Operation-level error taxonomy.
///
/// Store and precondition failures travel up unchanged as [`StoreError`] and are mapped
/// here at the lifecycle boundary. Transport adapters map these kinds to status codes.
#[derive(Error, Debug)]
pub enum KeystoneError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ceremony expired at {expired_at}")]
    Expired { expired_at: i64 },

    #[error("Conditional check failed: {0}")]
    ConditionalCheckFailed(String),

    #[error("Possible cloned authenticator for credential {credential_id}: counter {reported} does not advance {stored}")]
    CloneDetected {
        credential_id: String,
        stored: u32,
        reported: u32,
    },

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Unresolved table: {0}")]
    Unresolved(String),

    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeystoneError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConditionalCheckFailed(message.into())
    }

    /// Whether a surrounding transport may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for KeystoneError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConditionalCheckFailed { .. }
            | StoreError::TransactionCanceled { .. }
            | StoreError::TransactionConflict(_) => Self::ConditionalCheckFailed(err.to_string()),
            StoreError::Unresolved(_) | StoreError::TableNotFound(_) => {
                Self::Unresolved(err.to_string())
            }
            StoreError::Throttled(_) | StoreError::Connection(_) => Self::Transient(err.to_string()),
            StoreError::Cancelled(_) => Self::Cancelled(err.to_string()),
            StoreError::Validation(_)
            | StoreError::Migration(_)
            | StoreError::Query(_)
            | StoreError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeystoneError>;
