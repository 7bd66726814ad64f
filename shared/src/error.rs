use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("optimistic lock exhausted: {0}")]
    OptimisticLock(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl DomainError {
    /// Transient failures roll the current message back for redelivery.
    /// Everything else is a handled business outcome and must still reach
    /// the idempotency mark.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Database(_))
    }
}
