//! Observability Middleware
//!
//! Logs one `request_completed` line per request after the rest of the
//! chain ran, and stamps the response with `x-request-id`.

use crate::dispatch::chain::{HandlerFuture, Middleware, Next};
use crate::dispatch::context::RequestContext;

#[derive(Debug, Default)]
pub struct ObserveMiddleware;

impl Middleware for ObserveMiddleware {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            let result = next.run(ctx).await;
            let duration_ms = ctx.elapsed().as_millis() as u64;
            let request_id = ctx.request_id.to_string();
            let subject = ctx.auth.as_ref().map(|a| a.subject.as_str()).unwrap_or("-");

            match result {
                Ok(resp) => {
                    tracing::info!(
                        event = "request_completed",
                        request_id = %request_id,
                        method = %ctx.method,
                        path = %ctx.path,
                        status = resp.status,
                        duration_ms,
                        subject,
                    );
                    Ok(resp.with_header("x-request-id", request_id))
                }
                Err(err) => {
                    tracing::info!(
                        event = "request_completed",
                        request_id = %request_id,
                        method = %ctx.method,
                        path = %ctx.path,
                        status = err.status_code(),
                        error = err.code(),
                        duration_ms,
                        subject,
                    );
                    Err(err)
                }
            }
        })
    }
}
