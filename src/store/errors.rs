//! Store errors

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Record {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("Record {id} in {collection} was changed by a concurrent commit")]
    Conflict { collection: String, id: String },

    #[error("Record in {collection} is not an object")]
    NotAnObject { collection: String },

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(collection: &str, id: &str) -> Self {
        StoreError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } => 404,
            StoreError::Conflict { .. } => 409,
            StoreError::NotAnObject { .. } | StoreError::LockPoisoned | StoreError::Backend(_) => 500,
        }
    }
}
