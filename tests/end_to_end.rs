//! End-to-End Tests
//!
//! A project on disk is loaded, built into an application and driven both
//! through the dispatcher and through the HTTP router.

use std::fs;
use std::path::Path;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use mangolo::dispatch::{RequestContext, Response};
use mangolo::http_server::HttpServer;
use mangolo::project::{Application, Project, ProjectError};
use mangolo::routing::Method;
use mangolo::store::{Record, Store};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

// =============================================================================
// Helper Functions
// =============================================================================

fn write_project(dir: &Path) {
    fs::write(
        dir.join("mangolo.json"),
        r#"{ "name": "shop", "auth": { "jwt_secret": "e2e-secret" }, "runtime": { "execution_timeout_ms": 2000 } }"#,
    )
    .unwrap();

    fs::create_dir(dir.join("schemas")).unwrap();
    fs::write(
        dir.join("schemas/products.json"),
        json!({
            "name": "products",
            "fields": [
                { "name": "name", "kind": { "type": "string", "min_length": 2 }, "required": true },
                { "name": "price", "kind": { "type": "number", "min": 0 }, "required": true },
                { "name": "status", "kind": { "type": "enum", "values": ["draft", "published"], "default": "draft" } }
            ],
            "permissions": {
                "read": [
                    { "allow": ["*"], "when": { "compare": { "op": "eq", "left": { "field": "status" }, "right": { "value": "published" } } } },
                    { "allow": ["role:admin"] }
                ],
                "delete": [{ "allow": ["role:admin"] }]
            }
        })
        .to_string(),
    )
    .unwrap();

    fs::write(
        dir.join("routes.json"),
        json!({
            "routes": [
                { "method": "GET", "path": "/products", "middleware": ["observe"], "handler": "products.list" },
                { "method": "GET", "path": "/products/:id", "middleware": ["observe"], "handler": "products.get" },
                { "method": "POST", "path": "/products", "middleware": ["parse_json", "validate:products"], "handler": "products.create" },
                { "method": "DELETE", "path": "/products/:id", "middleware": ["authenticate", "authorize:products:delete"], "handler": "products.delete" }
            ]
        })
        .to_string(),
    )
    .unwrap();
}

fn application() -> (TempDir, Application) {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let project = Project::load(tmp.path()).unwrap();
    let app = project.application().build().unwrap();
    (tmp, app)
}

fn seed(app: &Application, value: Value) {
    let record: Record = value.as_object().cloned().unwrap();
    app.store.create("products", record).unwrap();
}

async fn get(app: &Application, path: &str) -> Response {
    app.dispatch(RequestContext::new(Method::Get, path)).await
}

fn bearer(app: &Application, subject: &str, role: Option<&str>) -> String {
    format!("Bearer {}", app.jwt().unwrap().issue(subject, role).unwrap())
}

// =============================================================================
// GET /products/:id
// =============================================================================

#[tokio::test]
async fn test_get_product_42_returns_stored_record() {
    let (_tmp, app) = application();
    let stored = json!({ "id": "42", "name": "Lamp", "price": 19.5, "status": "published" });
    seed(&app, stored.clone());

    let response = get(&app, "/products/42").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, stored);
    assert!(response.header("x-request-id").is_some());

    let response = get(&app, "/products/43").await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_unreadable_product_is_not_found() {
    let (_tmp, app) = application();
    seed(&app, json!({ "id": "7", "name": "Prototype", "price": 1, "status": "draft" }));

    assert_eq!(get(&app, "/products/7").await.status, 404);

    let listed = get(&app, "/products").await;
    assert_eq!(listed.status, 200);
    assert_eq!(listed.body["count"], 0);
}

#[tokio::test]
async fn test_get_product_42_over_http() {
    let (_tmp, app) = application();
    seed(&app, json!({ "id": "42", "name": "Lamp", "price": 19.5, "status": "published" }));

    let router = HttpServer::new(app.config.server.clone(), app.dispatcher.clone()).router();
    let request = Request::builder().uri("/products/42").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["name"], "Lamp");
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_create_validates_and_stores() {
    let (_tmp, app) = application();

    let response = app
        .dispatch(RequestContext::new(Method::Post, "/products").with_json(&json!({ "price": -1 })))
        .await;
    assert_eq!(response.status, 400);
    let details = response.body["error"]["details"].as_array().unwrap().clone();
    let fields: Vec<&str> = details.iter().filter_map(|d| d["field"].as_str()).collect();
    assert_eq!(fields, vec!["name", "price"]);

    let response = app
        .dispatch(
            RequestContext::new(Method::Post, "/products")
                .with_json(&json!({ "name": "Desk", "price": "120", "status": "published" })),
        )
        .await;
    assert_eq!(response.status, 201);
    assert_eq!(response.body["price"], json!(120));
    let id = response.body["id"].as_str().unwrap().to_string();

    assert_eq!(get(&app, &format!("/products/{}", id)).await.body["name"], "Desk");
}

#[tokio::test]
async fn test_delete_requires_admin() {
    let (_tmp, app) = application();
    seed(&app, json!({ "id": "42", "name": "Lamp", "price": 1, "status": "published" }));

    let delete = |auth: Option<String>| {
        let mut ctx = RequestContext::new(Method::Delete, "/products/42");
        if let Some(value) = auth {
            ctx = ctx.with_header("authorization", value);
        }
        ctx
    };

    assert_eq!(app.dispatch(delete(None)).await.status, 401);
    assert_eq!(app.dispatch(delete(Some(bearer(&app, "u1", None)))).await.status, 403);
    assert_eq!(get(&app, "/products/42").await.status, 200);

    assert_eq!(app.dispatch(delete(Some(bearer(&app, "root", Some("admin"))))).await.status, 204);
    assert_eq!(get(&app, "/products/42").await.status, 404);
}

// =============================================================================
// Project Loading
// =============================================================================

#[test]
fn test_missing_task_handler_rejected() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    fs::write(
        tmp.path().join("routes.json"),
        r#"{ "tasks": [{ "name": "send_receipt", "max_retries": 2 }] }"#,
    )
    .unwrap();

    let project = Project::load(tmp.path()).unwrap();
    let err = project.application().build().err().unwrap();
    assert!(matches!(err, ProjectError::MissingTaskHandler(name) if name == "send_receipt"));
}

#[test]
fn test_conflicting_routes_rejected_at_load() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    fs::write(
        tmp.path().join("routes.json"),
        r#"{ "routes": [
            { "method": "GET", "path": "/products/:id", "handler": "products.get" },
            { "method": "GET", "path": "/products/:sku", "handler": "products.get" }
        ] }"#,
    )
    .unwrap();

    let project = Project::load(tmp.path()).unwrap();
    assert!(matches!(project.application().build(), Err(ProjectError::Route(_))));
}
