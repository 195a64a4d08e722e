//! Compiled routes file
//!
//! ```json
//! {
//!   "routes":    [{ "method": "GET", "path": "/products/:id", "middleware": ["observe"], "handler": "products.get" }],
//!   "catch":     [{ "method": "ALL", "scope": "/products/*", "handler": "json_error" }],
//!   "tasks":     [{ "name": "send_welcome_email", "priority": "high", "max_retries": 3 }],
//!   "schedules": [{ "cron": "0 3 * * *", "task": "log", "payload": { "msg": "nightly" } }]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{ProjectError, ProjectResult};
use crate::dispatch::{CatchSpec, RouteSpec};
use crate::tasks::{ScheduleSpec, TaskDefinition};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteFile {
    #[serde(default)]
    pub routes: Vec<RouteSpec>,

    #[serde(default)]
    pub catch: Vec<CatchSpec>,

    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    #[serde(default)]
    pub schedules: Vec<ScheduleSpec>,
}

impl RouteFile {
    /// Reads the routes file. A missing file is an empty table.
    pub fn load(path: &Path) -> ProjectResult<Self> {
        if !path.exists() {
            tracing::warn!(event = "routes_file_missing", path = %path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|e| ProjectError::RoutesFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ProjectError::RoutesFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Method;
    use tempfile::TempDir;

    #[test]
    fn test_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        fs::write(
            &path,
            r#"{
                "routes": [{ "method": "GET", "path": "/products/:id", "handler": "products.get" }],
                "catch": [{ "scope": "/products/*", "handler": "oops" }],
                "schedules": [{ "cron": "0 3 * * *", "task": "log" }]
            }"#,
        )
        .unwrap();

        let file = RouteFile::load(&path).unwrap();
        assert_eq!(file.routes[0].method, Method::Get);
        assert!(file.routes[0].middleware.is_empty());
        assert_eq!(file.catch.len(), 1);
        assert!(file.tasks.is_empty());
        assert!(file.schedules[0].payload.is_null());
    }

    #[test]
    fn test_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        assert_eq!(RouteFile::load(&path).unwrap(), RouteFile::default());

        fs::write(&path, r#"{ "routez": [] }"#).unwrap();
        assert!(matches!(RouteFile::load(&path), Err(ProjectError::RoutesFile { .. })));
    }
}
