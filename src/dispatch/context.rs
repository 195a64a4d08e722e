//! Request Context
//!
//! Per-request state threaded through the middleware chain. One context
//! per request; nothing in it is shared between requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::routing::{Method, Params};
use crate::schema::ValidatedRecord;

/// Request context passed through the chain
#[derive(Debug)]
pub struct RequestContext {
    /// Unique request ID
    pub request_id: Uuid,

    pub method: Method,

    /// Path without the query string
    pub path: String,

    /// Path parameters captured by the matched route
    pub params: Params,

    pub query: HashMap<String, String>,

    /// Header names are lowercase
    pub headers: HashMap<String, String>,

    /// Raw request body
    pub body: Vec<u8>,

    /// Parsed body, set by `parse_json`
    pub resource: Option<Value>,

    /// Validated record, set by `validate:<schema>`
    pub validated: Option<ValidatedRecord>,

    pub client_addr: Option<SocketAddr>,

    /// Set by `authenticate`; absent for anonymous requests
    pub auth: Option<AuthContext>,

    /// Pattern of the matched route
    pub route: Option<String>,

    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            path: path.into(),
            params: Params::new(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            resource: None,
            validated: None,
            client_addr: None,
            auth: None,
            route: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body
    pub fn with_json(self, value: &Value) -> Self {
        let body = value.to_string();
        self.with_header("content-type", "application/json").with_body(body)
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let ctx = RequestContext::new(Method::Get, "/").with_header("Authorization", "Bearer x");
        assert_eq!(ctx.header("authorization"), Some("Bearer x"));
        assert_eq!(ctx.header("AUTHORIZATION"), Some("Bearer x"));
    }

    #[test]
    fn test_unique_request_ids() {
        let a = RequestContext::new(Method::Get, "/");
        let b = RequestContext::new(Method::Get, "/");
        assert_ne!(a.request_id, b.request_id);
        assert!(a.auth.is_none());
    }
}
