//! # Project Errors

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::routing::RouteError;
use crate::schema::SchemaError;
use crate::tasks::TaskError;

/// Result type for project loading
pub type ProjectResult<T> = Result<T, ProjectError>;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Failed to load routes file {path}: {reason}")]
    RoutesFile { path: PathBuf, reason: String },

    #[error("Task '{0}' has no registered handler")]
    MissingTaskHandler(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl ProjectError {
    /// Stable code for CLI output
    pub fn code(&self) -> &'static str {
        match self {
            ProjectError::Config(_) => "MANGOLO_CONFIG_INVALID",
            ProjectError::Schema(e) => e.code().code(),
            ProjectError::Route(_) => "MANGOLO_ROUTES_INVALID",
            ProjectError::Task(_) | ProjectError::MissingTaskHandler(_) => "MANGOLO_TASKS_INVALID",
            ProjectError::RoutesFile { .. } => "MANGOLO_ROUTES_MALFORMED_FILE",
            ProjectError::Server(_) => "MANGOLO_SERVER_FAILED",
        }
    }
}
