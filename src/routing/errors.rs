//! Routing errors
//!
//! All of these are configuration errors raised while the route table is
//! built. Resolution itself never fails; an unmatched path is a
//! [`Resolution::NotFound`](super::Resolution::NotFound).

use thiserror::Error;

/// Result type for route table construction
pub type RouteResult<T> = Result<T, RouteError>;

#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid method '{0}'")]
    InvalidMethod(String),

    #[error("Route {method} {pattern} is ambiguous with {method} {existing}")]
    Conflict {
        method: String,
        pattern: String,
        existing: String,
    },

    #[error("Catch handler scope {0} registered twice")]
    DuplicateCatch(String),

    #[error("Unknown handler '{0}'")]
    UnknownHandler(String),

    #[error("Unknown middleware '{0}'")]
    UnknownMiddleware(String),

    #[error("Invalid middleware '{name}': {reason}")]
    InvalidMiddleware { name: String, reason: String },

    #[error("Unknown catch handler '{0}'")]
    UnknownCatchHandler(String),
}
