//! Responses produced by handlers, middleware and error mapping.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// A response on its way back out of the chain
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl Response {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn created(body: Value) -> Self {
        Self::json(201, body)
    }

    pub fn no_content() -> Self {
        Self::json(204, Value::Null)
    }

    /// Fixed response for a request no route matches
    pub fn route_not_found() -> Self {
        Self::error(404, "ROUTE_NOT_FOUND", "route not found")
    }

    pub fn error(status: u16, code: &str, message: &str) -> Self {
        Self::json(
            status,
            json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            }),
        )
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_shape() {
        let resp = Response::route_not_found();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"]["code"], "ROUTE_NOT_FOUND");
        assert!(!resp.is_success());
    }
}
