//! # Project Configuration
//!
//! `mangolo.json` at the project root. Every section and every key is
//! optional:
//!
//! ```json
//! {
//!   "name": "shop",
//!   "server": { "host": "0.0.0.0", "port": 8080, "cors_origins": [] },
//!   "runtime": { "execution_timeout_ms": 30000 },
//!   "auth": { "jwt_secret": "...", "issuer": "shop" },
//!   "tasks": { "workers": 4, "rate_limit_per_minute": 600, "tie_break": "fifo" },
//!   "log": { "level": "info", "format": "json" },
//!   "schemas_dir": "schemas",
//!   "routes_file": "routes.json"
//! }
//! ```
//!
//! `MANGOLO_JWT_SECRET` overrides `auth.jwt_secret`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::JwtConfig;
use crate::http_server::HttpServerConfig;
use crate::tasks::{QueueConfig, RetryPolicy, TieBreak};

/// Manifest file name
pub const MANIFEST_FILE: &str = "mangolo.json";

/// Environment variable overriding the JWT secret
pub const JWT_SECRET_ENV: &str = "MANGOLO_JWT_SECRET";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Project manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub server: HttpServerConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Directory of schema JSON files, relative to the project root
    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: PathBuf,

    /// Compiled route table, relative to the project root
    #[serde(default = "default_routes_file")]
    pub routes_file: PathBuf,
}

fn default_name() -> String {
    "mangolo".to_string()
}

fn default_schemas_dir() -> PathBuf {
    PathBuf::from("schemas")
}

fn default_routes_file() -> PathBuf {
    PathBuf::from("routes.json")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            server: HttpServerConfig::default(),
            runtime: RuntimeConfig::default(),
            auth: AuthConfig::default(),
            tasks: TasksConfig::default(),
            log: LogConfig::default(),
            schemas_dir: default_schemas_dir(),
            routes_file: default_routes_file(),
        }
    }
}

/// Request execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound for one request's middleware chain and handler
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: default_execution_timeout_ms(),
        }
    }
}

/// Bearer token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret; `authenticate` is unavailable without one
    #[serde(default)]
    pub jwt_secret: Option<String>,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_token_ttl_secs")]
    pub access_token_ttl_secs: i64,
}

fn default_issuer() -> String {
    "mangolo".to_string()
}

fn default_token_ttl_secs() -> i64 {
    900
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: default_issuer(),
            access_token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

/// Task queue and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Claims per minute; absent means unlimited
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,

    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Terminal records kept per terminal state
    #[serde(default = "default_retention")]
    pub retention: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_workers() -> usize {
    4
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            rate_limit_per_minute: None,
            default_timeout_ms: default_task_timeout_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            default_max_retries: default_max_retries(),
            retention: default_retention(),
            poll_interval_ms: default_poll_interval_ms(),
            tie_break: TieBreak::Fifo,
        }
    }
}

impl TasksConfig {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            rate_limit_per_minute: self.rate_limit_per_minute,
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            default_max_retries: self.default_max_retries,
            retry: RetryPolicy::new(Duration::from_millis(self.max_backoff_ms)),
            retention: self.retention,
            tie_break: self.tie_break,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

impl ProjectConfig {
    /// Reads `mangolo.json` from the project root and applies environment
    /// overrides.
    pub fn load(project_dir: &Path) -> ConfigResult<Self> {
        let path = project_dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut config = Self::from_json(&raw).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse { path, reason },
            other => other,
        })?;
        config.apply_overrides(std::env::var(JWT_SECRET_ENV).ok());
        config.check()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(MANIFEST_FILE),
            reason: e.to_string(),
        })
    }

    fn apply_overrides(&mut self, jwt_secret: Option<String>) {
        if let Some(secret) = jwt_secret.filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = Some(secret);
        }
    }

    pub fn check(&self) -> ConfigResult<()> {
        if self.runtime.execution_timeout_ms == 0 {
            return Err(ConfigError::Invalid("runtime.execution_timeout_ms must be positive".into()));
        }
        if self.tasks.workers == 0 {
            return Err(ConfigError::Invalid("tasks.workers must be positive".into()));
        }
        if self.tasks.rate_limit_per_minute == Some(0) {
            return Err(ConfigError::Invalid("tasks.rate_limit_per_minute must be positive".into()));
        }
        if self.auth.access_token_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("auth.access_token_ttl_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.execution_timeout_ms)
    }

    /// JWT settings, when a secret is configured
    pub fn jwt_config(&self) -> Option<JwtConfig> {
        let secret = self.auth.jwt_secret.clone()?;
        Some(
            JwtConfig::new(secret)
                .with_ttl(chrono::Duration::seconds(self.auth.access_token_ttl_secs))
                .with_issuer(self.auth.issuer.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_manifest() {
        let config = ProjectConfig::from_json("{}").unwrap();
        assert_eq!(config.runtime.execution_timeout_ms, 30_000);
        assert_eq!(config.tasks.workers, 4);
        assert_eq!(config.tasks.tie_break, TieBreak::Fifo);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.schemas_dir, PathBuf::from("schemas"));
        assert!(config.jwt_config().is_none());
    }

    #[test]
    fn test_sections_parse() {
        let config = ProjectConfig::from_json(
            r#"{
                "runtime": { "execution_timeout_ms": 500 },
                "tasks": { "rate_limit_per_minute": 60, "tie_break": "lifo", "max_backoff_ms": 1000 },
                "log": { "level": "debug", "format": "json" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.execution_timeout(), Duration::from_millis(500));
        let queue = config.tasks.queue_config();
        assert_eq!(queue.rate_limit_per_minute, Some(60));
        assert_eq!(queue.tie_break, TieBreak::Lifo);
        assert_eq!(queue.retry.max_backoff, Duration::from_secs(1));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_secret_override() {
        let mut config = ProjectConfig::from_json(r#"{ "auth": { "jwt_secret": "from-file" } }"#).unwrap();
        config.apply_overrides(None);
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("from-file"));

        config.apply_overrides(Some("from-env".into()));
        let jwt = config.jwt_config().unwrap();
        assert_eq!(jwt.secret, "from-env");
        assert_eq!(jwt.issuer, "mangolo");
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(ProjectConfig::load(dir.path()), Err(ConfigError::Read { .. })));

        fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(matches!(ProjectConfig::load(dir.path()), Err(ConfigError::Parse { .. })));

        fs::write(dir.path().join(MANIFEST_FILE), r#"{ "tasks": { "workers": 0 } }"#).unwrap();
        assert!(matches!(ProjectConfig::load(dir.path()), Err(ConfigError::Invalid(_))));
    }
}
