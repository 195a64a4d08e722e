//! # Task Records

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Dispatch priority; higher runs first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Task lifecycle
///
/// `pending -> running -> {succeeded | pending (retry) | failed_exhausted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    FailedExhausted,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::FailedExhausted)
    }
}

/// A named task as declared in the routes file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinition {
    pub name: String,

    #[serde(default)]
    pub priority: Priority,

    /// Per-run timeout; also seeds the retry backoff
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::Normal,
            timeout_ms: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// One queued unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub priority: Priority,

    /// Runs started so far
    pub attempts: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,

    /// Not claimable before this instant
    pub next_run_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,

    /// Monotonic enqueue order, used as the final tie-break
    pub sequence: u64,

    pub state: TaskState,
    pub last_error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// True when another failure still leaves a retry
    pub fn retries_remaining(&self) -> bool {
        self.attempts <= self.max_retries
    }
}
