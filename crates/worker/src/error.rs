//! Worker error types.

use domain::{DomainError, QueueError};
use store::StoreError;
use thiserror::Error;

/// Errors raised while running a job.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A row the job refers to no longer exists.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The mailer rejected a message.
    #[error("Mail delivery failed: {0}")]
    Mail(String),

    /// The job descriptor could not be decoded.
    #[error("Job payload error: {0}")]
    Payload(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl WorkerError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        WorkerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns false for failures that another attempt cannot fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::NotFound { .. } | WorkerError::Payload(_) => false,
            WorkerError::Store(StoreError::NotFound { .. }) => false,
            WorkerError::Domain(DomainError::NotFound { .. }) => false,
            WorkerError::Mail(_) | WorkerError::Store(_) | WorkerError::Domain(_) => true,
        }
    }
}

/// Convenience type alias for worker results.
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_are_permanent() {
        assert!(!WorkerError::not_found("order", "x").is_retryable());
        assert!(
            !WorkerError::Store(StoreError::NotFound {
                entity: "order item",
                id: "x".to_string()
            })
            .is_retryable()
        );
    }

    #[test]
    fn delivery_failures_are_retried() {
        assert!(WorkerError::Mail("smtp timeout".to_string()).is_retryable());
        assert!(WorkerError::Store(StoreError::Conflict("busy".to_string())).is_retryable());
    }
}
