//! # Authentication
//!
//! Bearer-token authentication for routes and password hashing for
//! `hashed` schema fields.
//!
//! The dispatcher only ever consumes an [`AuthContext`]; the token format is
//! owned by the [`AuthProvider`] implementation.

pub mod crypto;
pub mod errors;
pub mod jwt;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use errors::{AuthError, AuthResult};
pub use jwt::{JwtAuthProvider, JwtClaims, JwtConfig};

/// Identity attached to a request by the `authenticate` middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Subject identity (user id)
    pub subject: String,

    /// Role claim, if the token carries one
    #[serde(default)]
    pub role: Option<String>,

    /// Remaining token claims
    #[serde(default)]
    pub claims: HashMap<String, Value>,
}

impl AuthContext {
    /// Create a context for a subject without a role
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: None,
            claims: HashMap::new(),
        }
    }

    /// Attach a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Whether the subject holds the given role
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }
}

/// Turns a bearer token into an authentication context.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, token: &str) -> AuthResult<AuthContext>;
}
