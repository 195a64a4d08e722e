use std::sync::Arc;

use crate::dispatch::chain::{HandlerFuture, Middleware, Next};
use crate::dispatch::context::RequestContext;
use crate::dispatch::errors::DispatchError;
use crate::schema::{Action, ObjectSchema};

/// `authorize:<schema>:<action>`: principal check against the schema's
/// permission map before any record is loaded. Record predicates are left to
/// the handler.
pub struct AuthorizeMiddleware {
    schema: Arc<ObjectSchema>,
    action: Action,
}

impl AuthorizeMiddleware {
    pub fn new(schema: Arc<ObjectSchema>, action: Action) -> Self {
        Self { schema, action }
    }
}

impl Middleware for AuthorizeMiddleware {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            if self.schema.permissions.allows_action(self.action, ctx.auth.as_ref()) {
                return next.run(ctx).await;
            }

            tracing::debug!(
                event = "authorization_denied",
                request_id = %ctx.request_id,
                schema = %self.schema.name,
                action = %self.action,
            );
            Err(DispatchError::denied(self.action, &self.schema.name, ctx.auth.is_some()))
        })
    }
}
