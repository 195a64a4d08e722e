//! Request dispatch
//!
//! A request is resolved against the route table, threaded through the
//! route's middleware chain into its handler and turned into exactly one
//! [`Response`]. Unexpected failures go to the most specific covering catch
//! handler.

pub mod chain;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod middleware;
pub mod registry;
pub mod response;

pub use chain::{catch_fn, handler_fn, CatchHandler, Handler, HandlerFuture, Middleware, Next};
pub use context::RequestContext;
pub use dispatcher::{CatchSpec, CompiledRoute, Dispatcher, RouteSpec};
pub use errors::{DispatchError, DispatchResult};
pub use registry::{ComponentRegistry, MiddlewareFactory};
pub use response::Response;
