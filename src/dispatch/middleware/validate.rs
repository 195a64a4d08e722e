use std::sync::Arc;

use serde_json::{Map, Value};

use crate::dispatch::chain::{HandlerFuture, Middleware, Next};
use crate::dispatch::context::RequestContext;
use crate::dispatch::errors::DispatchError;
use crate::schema::{validate, ObjectSchema};

/// `validate:<schema>`: validates `ctx.resource` as a new record and stores
/// the normalized result in `ctx.validated`. A missing resource validates
/// as an empty object.
pub struct ValidateMiddleware {
    schema: Arc<ObjectSchema>,
}

impl ValidateMiddleware {
    pub fn new(schema: Arc<ObjectSchema>) -> Self {
        Self { schema }
    }
}

impl Middleware for ValidateMiddleware {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            let empty = Value::Object(Map::new());
            let candidate = ctx.resource.as_ref().unwrap_or(&empty);

            match validate(&self.schema, candidate) {
                Ok(record) => {
                    ctx.validated = Some(record);
                    next.run(ctx).await
                }
                Err(errors) => {
                    tracing::debug!(
                        event = "validation_failed",
                        request_id = %ctx.request_id,
                        schema = %self.schema.name,
                        errors = errors.len(),
                    );
                    Err(DispatchError::Validation(errors))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::chain::handler_fn;
    use crate::dispatch::middleware::ParseJson;
    use crate::dispatch::response::Response;
    use crate::routing::Method;
    use crate::schema::{FieldKind, FieldSpec};
    use serde_json::json;

    fn chain() -> Vec<Arc<dyn Middleware>> {
        let schema = ObjectSchema::new(
            "users",
            vec![
                FieldSpec::new("email", FieldKind::string()).required(),
                FieldSpec::new("name", FieldKind::string()).required(),
            ],
        );
        vec![Arc::new(ParseJson), Arc::new(ValidateMiddleware::new(Arc::new(schema)))]
    }

    #[tokio::test]
    async fn test_invalid_body_lists_all_errors() {
        let chain = chain();
        let handler = handler_fn(|_ctx| Ok(Response::ok(Value::Null)));

        let mut ctx = RequestContext::new(Method::Post, "/users").with_json(&json!({}));
        let err = Next::new(&chain, &handler).run(&mut ctx).await.unwrap_err();
        match err {
            DispatchError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_valid_body_reaches_handler() {
        let chain = chain();
        let handler = handler_fn(|ctx| {
            let record = ctx.validated.clone().ok_or_else(|| DispatchError::internal("not validated"))?;
            Ok(Response::created(record.into_value()))
        });

        let mut ctx = RequestContext::new(Method::Post, "/users").with_json(&json!({ "email": "a@x.io", "name": "Ada" }));
        let resp = Next::new(&chain, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body["email"], "a@x.io");
    }
}
