//! Dispatcher
//!
//! Resolves a request against the frozen route table, runs the route's
//! chain under the execution timeout and turns the outcome into exactly one
//! response.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::chain::{CatchHandler, Handler, Middleware, Next};
use super::context::RequestContext;
use super::errors::DispatchError;
use super::registry::ComponentRegistry;
use super::response::Response;
use crate::routing::{Method, MethodScope, Resolution, RouteResult, RouteTable, RouteTableBuilder};

/// One route of a compiled route table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSpec {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub middleware: Vec<String>,
    pub handler: String,
    /// Catch handler for exactly this route
    #[serde(default)]
    pub catch: Option<String>,
}

/// A catch handler covering `METHOD|ALL` plus an exact or `prefix/*` scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatchSpec {
    #[serde(default = "default_catch_method")]
    pub method: MethodScope,
    pub scope: String,
    pub handler: String,
}

fn default_catch_method() -> MethodScope {
    MethodScope::Any
}

/// A route with its components resolved
pub struct CompiledRoute {
    pub handler_id: String,
    pub handler: Arc<dyn Handler>,
    pub middleware_names: Vec<String>,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

pub struct Dispatcher {
    table: RouteTable<CompiledRoute, Arc<dyn CatchHandler>>,
    timeout: Duration,
}

impl Dispatcher {
    /// Compiles route and catch specs. Unknown component ids and ambiguous
    /// routes are configuration errors.
    pub fn from_specs(
        routes: &[RouteSpec],
        catches: &[CatchSpec],
        registry: &ComponentRegistry,
        timeout: Duration,
    ) -> RouteResult<Self> {
        let mut builder = RouteTableBuilder::new();

        for spec in routes {
            let middleware = spec
                .middleware
                .iter()
                .map(|name| registry.middleware(name))
                .collect::<RouteResult<Vec<_>>>()?;
            let catch = spec.catch.as_deref().map(|id| registry.catch(id)).transpose()?;

            let compiled = CompiledRoute {
                handler_id: spec.handler.clone(),
                handler: registry.handler(&spec.handler)?,
                middleware_names: spec.middleware.clone(),
                middleware,
            };
            builder.register(spec.method, &spec.path, spec.middleware.clone(), compiled, catch)?;
        }

        for spec in catches {
            builder.add_catch(spec.method, &spec.scope, registry.catch(&spec.handler)?)?;
        }

        Ok(Self {
            table: builder.build(),
            timeout,
        })
    }

    pub fn table(&self) -> &RouteTable<CompiledRoute, Arc<dyn CatchHandler>> {
        &self.table
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Handles one request. Never fails: every outcome is a response.
    pub async fn dispatch(&self, mut ctx: RequestContext) -> Response {
        let matched = match self.table.resolve(ctx.method, &ctx.path) {
            Resolution::NotFound => {
                tracing::info!(
                    event = "route_not_found",
                    request_id = %ctx.request_id,
                    method = %ctx.method,
                    path = %ctx.path,
                );
                return Response::route_not_found();
            }
            Resolution::Matched(m) => m,
        };

        ctx.params = matched.params;
        ctx.route = Some(matched.route.pattern.to_string());
        let route = &matched.route.handler;

        let next = Next::new(&route.middleware, route.handler.as_ref());
        let result = match tokio::time::timeout(self.timeout, next.run(&mut ctx)).await {
            Ok(result) => result,
            // The chain future is dropped here, rolling back any open
            // transaction it held.
            Err(_) => Err(DispatchError::Timeout(self.timeout.as_millis() as u64)),
        };

        let err = match result {
            Ok(resp) => return resp,
            Err(err) => err,
        };

        if err.is_expected() || matches!(err, DispatchError::Timeout(_)) {
            tracing::debug!(
                event = "request_rejected",
                request_id = %ctx.request_id,
                status = err.status_code(),
                code = err.code(),
            );
            return err.to_response();
        }

        match matched.catch {
            Some(catch) => {
                tracing::warn!(
                    event = "request_failed",
                    request_id = %ctx.request_id,
                    handler = %route.handler_id,
                    error = %err,
                    caught = true,
                );
                catch.catch(&ctx, &err)
            }
            None => {
                tracing::error!(
                    event = "request_failed",
                    request_id = %ctx.request_id,
                    handler = %route.handler_id,
                    error = %err,
                    caught = false,
                );
                err.to_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::chain::{catch_fn, handler_fn, HandlerFuture};
    use crate::store::{InMemoryStore, Store};
    use crate::transaction::TransactionCoordinator;
    use serde_json::json;

    struct Slow;

    impl Handler for Slow {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> HandlerFuture<'a> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Response::ok(json!("late")))
            })
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register_handler(
            "echo",
            handler_fn(|ctx| Ok(Response::ok(json!({ "id": ctx.param("id") })))),
        );
        registry.register_handler("boom", handler_fn(|_ctx| Err(DispatchError::internal("boom"))));
        registry.register_handler(
            "missing",
            handler_fn(|_ctx| Err(DispatchError::not_found("widget 7"))),
        );
        registry.register_handler("slow", Slow);
        registry.register_catch(
            "admin_catch",
            catch_fn(|_ctx, err| Response::error(503, "ADMIN_DOWN", &err.code().to_lowercase())),
        );
        registry
    }

    fn route(method: Method, path: &str, handler: &str) -> RouteSpec {
        RouteSpec {
            method,
            path: path.into(),
            middleware: vec![],
            handler: handler.into(),
            catch: None,
        }
    }

    fn dispatcher(routes: Vec<RouteSpec>, catches: Vec<CatchSpec>) -> Dispatcher {
        Dispatcher::from_specs(&routes, &catches, &registry(), Duration::from_millis(100)).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let d = dispatcher(vec![route(Method::Get, "/widgets/:id", "echo")], vec![]);
        let resp = d.dispatch(RequestContext::new(Method::Get, "/widgets/7")).await;

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!({ "id": "7" }));
    }

    #[tokio::test]
    async fn test_not_found_is_fixed_response() {
        let d = dispatcher(vec![route(Method::Get, "/widgets/:id", "echo")], vec![]);
        let resp = d.dispatch(RequestContext::new(Method::Get, "/gadgets/7")).await;
        assert_eq!(resp, Response::route_not_found());
    }

    #[tokio::test]
    async fn test_unexpected_error_goes_to_catch_handler() {
        let d = dispatcher(
            vec![route(Method::Get, "/admin/boom", "boom"), route(Method::Get, "/boom", "boom")],
            vec![CatchSpec {
                method: MethodScope::Any,
                scope: "/admin/*".into(),
                handler: "admin_catch".into(),
            }],
        );

        let caught = d.dispatch(RequestContext::new(Method::Get, "/admin/boom")).await;
        assert_eq!(caught.status, 503);

        let uncaught = d.dispatch(RequestContext::new(Method::Get, "/boom")).await;
        assert_eq!(uncaught.status, 500);
        assert_eq!(uncaught.body["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_expected_error_bypasses_catch_handler() {
        let d = dispatcher(
            vec![route(Method::Get, "/admin/widget", "missing")],
            vec![CatchSpec {
                method: MethodScope::Any,
                scope: "/admin/*".into(),
                handler: "admin_catch".into(),
            }],
        );

        let resp = d.dispatch(RequestContext::new(Method::Get, "/admin/widget")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_timeout_yields_504() {
        let d = dispatcher(vec![route(Method::Get, "/slow", "slow")], vec![]);
        let resp = d.dispatch(RequestContext::new(Method::Get, "/slow")).await;
        assert_eq!(resp.status, 504);
    }

    /// Stages a write, then stalls past the execution timeout.
    struct StagesThenStalls {
        coordinator: TransactionCoordinator,
    }

    impl Handler for StagesThenStalls {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> HandlerFuture<'a> {
            Box::pin(async move {
                let mut tx = self.coordinator.begin()?;
                tx.insert("orders", json!({ "id": "o1", "total": 10 }).as_object().cloned().unwrap_or_default())?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                tx.commit()?;
                Ok(Response::created(json!({ "id": "o1" })))
            })
        }
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_open_transaction() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = registry();
        registry.register_handler(
            "stalls",
            StagesThenStalls {
                coordinator: TransactionCoordinator::new(store.clone()),
            },
        );
        let d = Dispatcher::from_specs(
            &[route(Method::Post, "/orders", "stalls")],
            &[],
            &registry,
            Duration::from_millis(100),
        )
        .unwrap();

        let resp = d.dispatch(RequestContext::new(Method::Post, "/orders")).await;

        assert_eq!(resp.status, 504);
        assert!(store.get("orders", "o1").unwrap().is_none());
        assert_eq!(store.count("orders").unwrap(), 0);
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let result = Dispatcher::from_specs(
            &[route(Method::Get, "/x", "nope")],
            &[],
            &registry(),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_route_spec_json() {
        let spec: RouteSpec = serde_json::from_value(json!({
            "method": "get",
            "path": "/products/:id",
            "middleware": ["authenticate"],
            "handler": "products.get"
        }))
        .unwrap();
        assert_eq!(spec.method, Method::Get);
        assert_eq!(spec.catch, None);
    }
}
