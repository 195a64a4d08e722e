use serde_json::Value;

use crate::dispatch::chain::{HandlerFuture, Middleware, Next};
use crate::dispatch::context::RequestContext;
use crate::dispatch::errors::DispatchError;

/// `parse_json`: parses the request body into `ctx.resource`. An empty body
/// leaves the resource unset.
#[derive(Debug, Default)]
pub struct ParseJson;

impl Middleware for ParseJson {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            if !ctx.body.iter().all(u8::is_ascii_whitespace) {
                let value: Value = serde_json::from_slice(&ctx.body)
                    .map_err(|e| DispatchError::bad_request(format!("malformed JSON body: {}", e)))?;
                ctx.resource = Some(value);
            }
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::chain::handler_fn;
    use crate::dispatch::response::Response;
    use crate::routing::Method;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_parses_body() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ParseJson)];
        let handler = handler_fn(|ctx| Ok(Response::ok(ctx.resource.clone().unwrap_or(Value::Null))));

        let mut ctx = RequestContext::new(Method::Post, "/").with_json(&json!({ "a": 1 }));
        let resp = Next::new(&chain, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(resp.body, json!({ "a": 1 }));

        let mut empty = RequestContext::new(Method::Post, "/");
        let resp = Next::new(&chain, &handler).run(&mut empty).await.unwrap();
        assert_eq!(resp.body, Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ParseJson)];
        let handler = handler_fn(|_ctx| Ok(Response::ok(Value::Null)));

        let mut ctx = RequestContext::new(Method::Post, "/").with_body("{ nope");
        let err = Next::new(&chain, &handler).run(&mut ctx).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
