//! Transaction errors

use thiserror::Error;

use crate::schema::ValidationErrors;
use crate::store::StoreError;

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    /// A store operation failed; the transaction was rolled back
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A deferred check failed at commit; the transaction was rolled back
    #[error(transparent)]
    Validation(ValidationErrors),

    /// The transaction was already committed or rolled back
    #[error("Transaction is closed")]
    Closed,
}

impl TransactionError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            TransactionError::Store(e) => e.status_code(),
            TransactionError::Validation(_) => 400,
            TransactionError::Closed => 500,
        }
    }
}
