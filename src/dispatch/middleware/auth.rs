//! Authentication Middleware
//!
//! Validates the bearer token and attaches the caller's identity.

use std::sync::Arc;

use crate::dispatch::chain::{HandlerFuture, Middleware, Next};
use crate::dispatch::context::RequestContext;
use crate::dispatch::errors::DispatchError;

pub use crate::auth::{AuthContext, AuthError, AuthProvider};

/// `authenticate`
pub struct AuthenticateMiddleware {
    provider: Arc<dyn AuthProvider>,
}

impl AuthenticateMiddleware {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }

    fn authenticate(&self, ctx: &RequestContext) -> Result<AuthContext, AuthError> {
        let header = ctx.header("authorization").ok_or(AuthError::MissingCredentials)?;
        let (scheme, token) = header.split_once(' ').ok_or(AuthError::UnsupportedScheme)?;
        if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
            return Err(AuthError::UnsupportedScheme);
        }
        self.provider.authenticate(token.trim())
    }
}

impl Middleware for AuthenticateMiddleware {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            match self.authenticate(ctx) {
                Ok(auth) => {
                    ctx.auth = Some(auth);
                    next.run(ctx).await
                }
                Err(err) => {
                    tracing::debug!(event = "authentication_failed", request_id = %ctx.request_id, reason = %err);
                    Err(DispatchError::from(err))
                }
            }
        })
    }
}

/// `require_role:<role>`
pub struct RequireRole {
    role: String,
}

impl RequireRole {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

impl Middleware for RequireRole {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            let admitted = match &ctx.auth {
                None => return Err(DispatchError::unauthenticated("this route requires authentication")),
                Some(auth) => auth.has_role(&self.role),
            };
            if !admitted {
                return Err(DispatchError::forbidden(format!("role '{}' required", self.role)));
            }
            next.run(ctx).await
        })
    }
}
