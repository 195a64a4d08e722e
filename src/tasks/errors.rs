//! # Task Errors

use thiserror::Error;

/// Result type for task queue operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Task queue and task execution errors
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task already defined: {0}")]
    DuplicateTask(String),

    #[error("Task record not found: {0}")]
    RecordNotFound(uuid::Uuid),

    #[error("Task record {0} is not running")]
    NotRunning(uuid::Uuid),

    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task timeout after {0}ms")]
    Timeout(u64),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            TaskError::UnknownTask(_) | TaskError::RecordNotFound(_) => 404,
            TaskError::DuplicateTask(_) | TaskError::NotRunning(_) => 409,
            TaskError::InvalidCron { .. } => 400,
            TaskError::Timeout(_) => 504,
            TaskError::Failed(_) | TaskError::Panicked(_) | TaskError::LockPoisoned => 500,
        }
    }
}
