//! # HTTP Server
//!
//! Adapts axum requests to [`RequestContext`] and hands them to the
//! dispatcher. Every path goes through one fallback handler; routing is the
//! dispatcher's job.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::config::HttpServerConfig;
use crate::dispatch::{Dispatcher, RequestContext, Response};
use crate::routing::Method;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// HTTP front end of a dispatcher
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let router = Self::build_router(&config, dispatcher);
        Self { config, router }
    }

    fn build_router(config: &HttpServerConfig, dispatcher: Arc<Dispatcher>) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .fallback(handle)
            .with_state(dispatcher)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serves until `shutdown` resolves.
    pub async fn start<F>(self, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address {}: {}", self.config.socket_addr(), e),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(event = "http_server_started", addr = %addr);

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!(event = "http_server_stopped", addr = %addr);
        Ok(())
    }
}

async fn handle(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> axum::response::Response {
    let ctx = match into_context(request).await {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    into_http(dispatcher.dispatch(ctx).await)
}

async fn into_context(request: Request) -> Result<RequestContext, axum::response::Response> {
    let (parts, body) = request.into_parts();

    let method = Method::from_str(parts.method.as_str()).map_err(|_| {
        into_http(Response::error(405, "METHOD_NOT_ALLOWED", "method not allowed"))
    })?;

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .map_err(|e| into_http(Response::error(400, "BAD_REQUEST", &e.body_text())))?;

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| into_http(Response::error(413, "PAYLOAD_TOO_LARGE", "request body too large")))?;

    let mut ctx = RequestContext::new(method, parts.uri.path())
        .with_query(query)
        .with_body(body.to_vec());

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), value);
        }
    }
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        ctx = ctx.with_client_addr(*addr);
    }

    Ok(ctx)
}

fn into_http(resp: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut http = if status == StatusCode::NO_CONTENT {
        (status, Body::empty()).into_response()
    } else {
        (status, Json(resp.body)).into_response()
    };

    for (name, value) in resp.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(&name), HeaderValue::from_str(&value)) {
            http.headers_mut().insert(name, value);
        }
    }
    http
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{handler_fn, ComponentRegistry, RouteSpec};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        let mut registry = ComponentRegistry::new();
        registry.register_handler(
            "echo",
            handler_fn(|ctx| {
                Ok(Response::ok(json!({
                    "id": ctx.param("id"),
                    "q": ctx.query.get("q"),
                    "agent": ctx.header("user-agent"),
                    "len": ctx.body.len(),
                })))
            }),
        );
        registry.register_handler("gone", handler_fn(|_ctx| Ok(Response::no_content())));

        let routes = vec![
            RouteSpec {
                method: Method::Post,
                path: "/items/:id".into(),
                middleware: vec![],
                handler: "echo".into(),
                catch: None,
            },
            RouteSpec {
                method: Method::Delete,
                path: "/items/:id".into(),
                middleware: vec![],
                handler: "gone".into(),
                catch: None,
            },
        ];
        let dispatcher = Dispatcher::from_specs(&routes, &[], &registry, Duration::from_secs(5)).unwrap();
        HttpServer::new(HttpServerConfig::default(), Arc::new(dispatcher))
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), MAX_BODY_BYTES).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_request_reaches_dispatcher() {
        let request = Request::builder()
            .method("POST")
            .uri("/items/9?q=lamp")
            .header("User-Agent", "test")
            .body(Body::from("abc"))
            .unwrap();

        let resp = server().router().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({ "id": "9", "q": "lamp", "agent": "test", "len": 3 }));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let request = Request::builder().uri("/nowhere").body(Body::empty()).unwrap();

        let resp = server().router().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], "ROUTE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_no_content() {
        let request = Request::builder()
            .method("DELETE")
            .uri("/items/1")
            .body(Body::empty())
            .unwrap();

        let resp = server().router().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let bytes = to_bytes(resp.into_body(), MAX_BODY_BYTES).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(server().socket_addr(), "127.0.0.1:8080");
    }
}
