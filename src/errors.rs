//! Error types for agreement workflow operations
//!
//! Every variant maps to a stable code so callers (CLI, HTTP adapters) can
//! branch on the kind of failure without matching on message text.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for agreement operations
pub type Result<T> = std::result::Result<T, AgreementError>;

/// Errors surfaced synchronously by the store, the step engine and the service
#[derive(Debug, Error)]
pub enum AgreementError {
    /// A required creation field is missing or a field value is malformed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown agreement id
    #[error("Agreement not found: {0}")]
    NotFound(Uuid),

    /// Ordinal outside the fixed workflow range
    #[error("Invalid step ordinal {ordinal}: workflow steps are numbered 1 to {max}")]
    InvalidStep { ordinal: u8, max: u8 },

    /// Step data submitted for a step the record has not reached yet
    #[error("Step {ordinal} is not open yet (current step is {current_step})")]
    StepNotOpen { ordinal: u8, current_step: u8 },

    /// Completion requested for a step other than the current one
    #[error("Step {ordinal} cannot be completed out of order (current step is {current_step})")]
    OutOfOrder { ordinal: u8, current_step: u8 },

    /// Upload or approval missing for the step's kind
    #[error("Step {ordinal} cannot be completed: {reason}")]
    IncompletePrecondition { ordinal: u8, reason: String },

    /// Optimistic concurrency check lost repeatedly
    #[error("Concurrent modification of agreement {0}")]
    Conflict(Uuid),

    /// Persistence backend failure (IO, serialization, database)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Attachment service failure
    #[error("Attachment error: {0}")]
    Attachment(String),
}

impl AgreementError {
    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            AgreementError::Validation(_) => "VALIDATION",
            AgreementError::NotFound(_) => "NOT_FOUND",
            AgreementError::InvalidStep { .. } => "INVALID_STEP",
            AgreementError::StepNotOpen { .. } => "STEP_NOT_OPEN",
            AgreementError::OutOfOrder { .. } => "OUT_OF_ORDER",
            AgreementError::IncompletePrecondition { .. } => "INCOMPLETE_PRECONDITION",
            AgreementError::Conflict(_) => "CONFLICT",
            AgreementError::Storage(_) => "STORAGE",
            AgreementError::Attachment(_) => "ATTACHMENT",
        }
    }

    /// Errors the caller caused and can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            AgreementError::Conflict(_) | AgreementError::Storage(_) | AgreementError::Attachment(_)
        )
    }

    /// Wrap a backend error as a storage failure with context
    pub fn storage<E: std::fmt::Display>(error: E, context: impl Into<String>) -> Self {
        AgreementError::Storage(format!("{}: {}", context.into(), error))
    }
}

impl From<std::io::Error> for AgreementError {
    fn from(err: std::io::Error) -> Self {
        AgreementError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AgreementError {
    fn from(err: serde_json::Error) -> Self {
        AgreementError::Storage(format!("serialization: {err}"))
    }
}

/// Convert an error to a process exit code for the CLI
pub fn to_exit_code(error: &AgreementError) -> i32 {
    match error {
        AgreementError::NotFound(_) => 3,
        e if e.is_client_error() => 2,
        _ => 1,
    }
}
