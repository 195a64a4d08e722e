//! Middleware Chain
//!
//! A route's middleware run in declaration order around its handler. Each
//! middleware receives a [`Next`]; awaiting `next.run(ctx)` runs the rest of
//! the chain and yields its result, not calling it short-circuits with the
//! middleware's own result. Post-processing therefore happens in reverse
//! order.
//!
//! Every stage returns `DispatchResult<Response>`, so each request ends with
//! exactly one response or one error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::context::RequestContext;
use super::errors::{DispatchError, DispatchResult};
use super::response::Response;

/// Boxed future returned by every chain stage
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = DispatchResult<Response>> + Send + 'a>>;

/// Terminal stage of a route
pub trait Handler: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> HandlerFuture<'a>;
}

/// Middleware trait for chain stages
pub trait Middleware: Send + Sync {
    /// Process the request, optionally running the rest of the chain
    fn process<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> HandlerFuture<'a>;
}

/// Turns an unexpected error into the response for a request
pub trait CatchHandler: Send + Sync {
    fn catch(&self, ctx: &RequestContext, error: &DispatchError) -> Response;
}

/// The remainder of a chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self { middleware, handler }
    }

    /// Run the next middleware or the handler
    pub fn run<'b>(self, ctx: &'b mut RequestContext) -> HandlerFuture<'b>
    where
        'a: 'b,
    {
        Box::pin(async move {
            if let Some((first, rest)) = self.middleware.split_first() {
                let next = Next {
                    middleware: rest,
                    handler: self.handler,
                };
                first.process(ctx, next).await
            } else {
                // End of middleware chain, run the handler
                self.handler.call(ctx).await
            }
        })
    }
}

/// Handler backed by a synchronous function
pub struct FnHandler<F>(F);

/// Wraps a synchronous function as a [`Handler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut RequestContext) -> DispatchResult<Response> + Send + Sync,
{
    FnHandler(f)
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut RequestContext) -> DispatchResult<Response> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> HandlerFuture<'a> {
        let result = (self.0)(ctx);
        Box::pin(std::future::ready(result))
    }
}

/// Catch handler backed by a function
pub struct FnCatch<F>(F);

pub fn catch_fn<F>(f: F) -> FnCatch<F>
where
    F: Fn(&RequestContext, &DispatchError) -> Response + Send + Sync,
{
    FnCatch(f)
}

impl<F> CatchHandler for FnCatch<F>
where
    F: Fn(&RequestContext, &DispatchError) -> Response + Send + Sync,
{
    fn catch(&self, ctx: &RequestContext, error: &DispatchError) -> Response {
        (self.0)(ctx, error)
    }
}
