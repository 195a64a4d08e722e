//! Dispatch errors
//!
//! Validation, authentication, authorization, bad-request and not-found
//! errors are expected outcomes and become structured responses directly.
//! Everything else is handed to the covering catch handler.

use serde_json::json;
use thiserror::Error;

use super::response::Response;
use crate::auth::AuthError;
use crate::schema::{Action, ValidationErrors};
use crate::store::StoreError;
use crate::tasks::TaskError;
use crate::transaction::TransactionError;

/// Result type for handlers and middleware
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("route not found")]
    RouteNotFound,

    #[error(transparent)]
    Validation(ValidationErrors),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    TaskExecution(#[from] TaskError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Permission failure: 401 for anonymous callers, 403 otherwise.
    pub fn denied(action: Action, schema: &str, authenticated: bool) -> Self {
        if authenticated {
            Self::forbidden(format!("{} on {} is not permitted", action, schema))
        } else {
            Self::unauthenticated(format!("{} on {} requires authentication", action, schema))
        }
    }

    /// Expected errors become structured responses without reaching a catch
    /// handler.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::RouteNotFound
                | Self::Validation(_)
                | Self::Authentication(_)
                | Self::Authorization(_)
                | Self::NotFound(_)
                | Self::BadRequest(_)
        )
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RouteNotFound | Self::NotFound(_) => 404,
            Self::Validation(_) | Self::BadRequest(_) => 400,
            Self::Authentication(_) => 401,
            Self::Authorization(_) => 403,
            Self::Timeout(_) => 504,
            Self::Store(_) | Self::TaskExecution(_) | Self::Internal(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Authentication(_) => "AUTHENTICATION_REQUIRED",
            Self::Authorization(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Store(_) => "STORE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::TaskExecution(_) => "TASK_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured response. Unexpected errors never leak their details.
    pub fn to_response(&self) -> Response {
        match self {
            Self::RouteNotFound => Response::route_not_found(),
            Self::Validation(errors) => Response::json(
                400,
                json!({
                    "error": {
                        "code": self.code(),
                        "message": "validation failed",
                        "details": errors,
                    }
                }),
            ),
            Self::Authentication(_)
            | Self::Authorization(_)
            | Self::NotFound(_)
            | Self::BadRequest(_) => Response::error(self.status_code(), self.code(), &self.to_string()),
            Self::Timeout(_) => Response::error(504, self.code(), "request timed out"),
            Self::Store(_) | Self::TaskExecution(_) | Self::Internal(_) => {
                Response::error(500, "INTERNAL_ERROR", "internal server error")
            }
        }
    }
}

impl From<ValidationErrors> for DispatchError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Store(other),
        }
    }
}

impl From<TransactionError> for DispatchError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Store(e) => e.into(),
            TransactionError::Validation(errors) => Self::Validation(errors),
            TransactionError::Closed => Self::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for DispatchError {
    fn from(err: AuthError) -> Self {
        match err.status_code() {
            401 => Self::Authentication(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationDetails;

    #[test]
    fn test_expected_errors() {
        assert!(DispatchError::unauthenticated("x").is_expected());
        assert!(DispatchError::not_found("x").is_expected());
        assert!(!DispatchError::internal("x").is_expected());
        assert!(!DispatchError::Timeout(10).is_expected());
    }

    #[test]
    fn test_validation_response_lists_every_error() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationDetails::missing_field("email"));
        errors.push(ValidationDetails::missing_field("name"));

        let resp = DispatchError::from(errors).to_response();
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"]["details"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let resp = DispatchError::internal("db password is hunter2").to_response();
        assert_eq!(resp.status, 500);
        assert!(!resp.body.to_string().contains("hunter2"));
    }

    #[test]
    fn test_transaction_error_mapping() {
        let err: DispatchError = TransactionError::Store(StoreError::not_found("users", "1")).into();
        assert_eq!(err.status_code(), 404);

        let err: DispatchError = TransactionError::Store(StoreError::LockPoisoned).into();
        assert_eq!(err.status_code(), 500);
    }
}
