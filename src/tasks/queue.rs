//! # Task Queue
//!
//! All queue state sits behind one mutex, so a claim is atomic: a record
//! handed to one worker is `running` before the lock is released and can
//! never be handed out twice.
//!
//! Ready records are ordered by priority, then enqueue time, then the
//! configured [`TieBreak`] on the enqueue sequence. Delayed records wait in
//! a time-ordered set and cost nothing until they become due.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use super::errors::{TaskError, TaskResult};
use super::policy::RetryPolicy;
use super::record::{Priority, TaskDefinition, TaskRecord, TaskState};

/// Order among ready tasks with equal priority and enqueue time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    #[default]
    Fifo,
    Lifo,
}

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Claims allowed per rolling minute; `None` is unlimited
    pub rate_limit_per_minute: Option<u32>,
    pub default_timeout: Duration,
    pub default_max_retries: u32,
    pub retry: RetryPolicy,
    /// Terminal records kept per terminal state
    pub retention: usize,
    pub tie_break: TieBreak,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: None,
            default_timeout: Duration::from_secs(30),
            default_max_retries: 3,
            retry: RetryPolicy::default(),
            retention: 1000,
            tie_break: TieBreak::Fifo,
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: usize,
    pub delayed: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed_exhausted: usize,
}

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    sequence: u64,
    tie_break: TieBreak,
    id: Uuid,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let sequence = match self.tie_break {
            TieBreak::Fifo => other.sequence.cmp(&self.sequence),
            TieBreak::Lifo => self.sequence.cmp(&other.sequence),
        };
        self.priority
            .cmp(&other.priority)
            .then_with(|| Reverse(self.enqueued_at).cmp(&Reverse(other.enqueued_at)))
            .then(sequence)
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    definitions: HashMap<String, TaskDefinition>,
    records: HashMap<Uuid, TaskRecord>,
    ready: BinaryHeap<ReadyEntry>,
    delayed: BTreeMap<(DateTime<Utc>, u64), Uuid>,
    claims: VecDeque<DateTime<Utc>>,
    succeeded: VecDeque<Uuid>,
    exhausted: VecDeque<Uuid>,
    next_sequence: u64,
}

impl QueueState {
    fn push_pending(&mut self, record: &TaskRecord, now: DateTime<Utc>, tie_break: TieBreak) {
        if record.next_run_at <= now {
            self.ready.push(ReadyEntry {
                priority: record.priority,
                enqueued_at: record.enqueued_at,
                sequence: record.sequence,
                tie_break,
                id: record.id,
            });
        } else {
            self.delayed.insert((record.next_run_at, record.sequence), record.id);
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>, tie_break: TieBreak) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            if let Some(record) = self.records.get(&id) {
                self.ready.push(ReadyEntry {
                    priority: record.priority,
                    enqueued_at: record.enqueued_at,
                    sequence: record.sequence,
                    tie_break,
                    id,
                });
            }
        }
    }

    fn rate_limited(&mut self, now: DateTime<Utc>, limit: Option<u32>) -> bool {
        let Some(limit) = limit else {
            return false;
        };
        let window_start = now - chrono::Duration::minutes(1);
        while self.claims.front().is_some_and(|t| *t <= window_start) {
            self.claims.pop_front();
        }
        self.claims.len() >= limit as usize
    }

    fn retain_terminal(&mut self, id: Uuid, state: TaskState, retention: usize) {
        let list = match state {
            TaskState::Succeeded => &mut self.succeeded,
            _ => &mut self.exhausted,
        };
        list.push_back(id);
        while list.len() > retention {
            if let Some(old) = list.pop_front() {
                self.records.remove(&old);
            }
        }
    }
}

/// `at + delay`, saturating at the latest representable instant
fn offset(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Shared task queue
pub struct TaskQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    available: Notify,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn lock(&self) -> TaskResult<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| TaskError::LockPoisoned)
    }

    /// Declares a task name; only declared tasks can be queued.
    pub fn define(&self, definition: TaskDefinition) -> TaskResult<()> {
        let mut state = self.lock()?;
        if state.definitions.contains_key(&definition.name) {
            return Err(TaskError::DuplicateTask(definition.name));
        }
        state.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lock().map(|s| s.definitions.contains_key(name)).unwrap_or(false)
    }

    /// Declared task names in sorted order
    pub fn definitions(&self) -> Vec<TaskDefinition> {
        let mut defs: Vec<TaskDefinition> = self
            .lock()
            .map(|s| s.definitions.values().cloned().collect())
            .unwrap_or_default();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Queues a task for immediate dispatch.
    pub fn enqueue(&self, name: &str, payload: Value) -> TaskResult<Uuid> {
        self.schedule_at(name, payload, Utc::now(), None)
    }

    /// Queues a task that becomes eligible once `delay` has elapsed.
    pub fn schedule(&self, name: &str, payload: Value, delay: Duration, max_retries: Option<u32>) -> TaskResult<Uuid> {
        let now = Utc::now();
        let run_at = offset(now, delay);
        self.insert(name, payload, now, run_at, max_retries)
    }

    /// Queues a task eligible at `run_at`.
    pub fn schedule_at(
        &self,
        name: &str,
        payload: Value,
        run_at: DateTime<Utc>,
        max_retries: Option<u32>,
    ) -> TaskResult<Uuid> {
        self.insert(name, payload, Utc::now(), run_at, max_retries)
    }

    fn insert(
        &self,
        name: &str,
        payload: Value,
        now: DateTime<Utc>,
        run_at: DateTime<Utc>,
        max_retries: Option<u32>,
    ) -> TaskResult<Uuid> {
        let record = {
            let mut state = self.lock()?;
            let def = state
                .definitions
                .get(name)
                .ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;

            let record = TaskRecord {
                id: Uuid::new_v4(),
                name: name.to_string(),
                payload,
                priority: def.priority,
                attempts: 0,
                max_retries: max_retries
                    .or(def.max_retries)
                    .unwrap_or(self.config.default_max_retries),
                timeout_ms: def
                    .timeout_ms
                    .unwrap_or(self.config.default_timeout.as_millis() as u64),
                next_run_at: run_at,
                enqueued_at: now,
                sequence: state.next_sequence,
                state: TaskState::Pending,
                last_error: None,
                finished_at: None,
            };
            state.next_sequence += 1;
            state.push_pending(&record, now, self.config.tie_break);
            state.records.insert(record.id, record.clone());
            record
        };

        tracing::debug!(
            event = "task_enqueued",
            task_id = %record.id,
            task = %record.name,
            priority = ?record.priority,
            run_at = %record.next_run_at,
        );
        self.available.notify_one();
        Ok(record.id)
    }

    /// Claims the next eligible task, if any.
    pub fn claim(&self) -> TaskResult<Option<TaskRecord>> {
        self.claim_at(Utc::now())
    }

    /// Claims the next task eligible at `now`. Throttled claims return `None`
    /// and leave the work queued.
    pub fn claim_at(&self, now: DateTime<Utc>) -> TaskResult<Option<TaskRecord>> {
        let mut state = self.lock()?;
        state.promote_due(now, self.config.tie_break);

        if state.ready.is_empty() || state.rate_limited(now, self.config.rate_limit_per_minute) {
            return Ok(None);
        }

        while let Some(entry) = state.ready.pop() {
            let Some(record) = state.records.get_mut(&entry.id) else {
                continue;
            };
            if record.state != TaskState::Pending {
                continue;
            }
            record.state = TaskState::Running;
            record.attempts += 1;
            let claimed = record.clone();
            state.claims.push_back(now);
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    /// Records the outcome of a run.
    pub fn complete(&self, id: Uuid, outcome: Result<(), TaskError>) -> TaskResult<TaskState> {
        self.complete_at(id, outcome, Utc::now())
    }

    pub fn complete_at(&self, id: Uuid, outcome: Result<(), TaskError>, now: DateTime<Utc>) -> TaskResult<TaskState> {
        let mut state = self.lock()?;
        let record = state.records.get_mut(&id).ok_or(TaskError::RecordNotFound(id))?;
        if record.state != TaskState::Running {
            return Err(TaskError::NotRunning(id));
        }

        let err = match outcome {
            Ok(()) => {
                record.state = TaskState::Succeeded;
                record.last_error = None;
                record.finished_at = Some(now);
                tracing::debug!(event = "task_succeeded", task_id = %id, task = %record.name, attempts = record.attempts);
                state.retain_terminal(id, TaskState::Succeeded, self.config.retention);
                return Ok(TaskState::Succeeded);
            }
            Err(err) => err,
        };

        record.last_error = Some(err.to_string());
        if record.retries_remaining() {
            let backoff = self.config.retry.backoff(record.timeout(), record.attempts);
            record.state = TaskState::Pending;
            record.next_run_at = offset(now, backoff);
            tracing::warn!(
                event = "task_retry_scheduled",
                task_id = %id,
                task = %record.name,
                attempts = record.attempts,
                max_retries = record.max_retries,
                next_run_at = %record.next_run_at,
                error = %err,
            );
            let record = record.clone();
            state.push_pending(&record, now, self.config.tie_break);
            drop(state);
            self.available.notify_one();
            Ok(TaskState::Pending)
        } else {
            record.state = TaskState::FailedExhausted;
            record.finished_at = Some(now);
            tracing::error!(
                event = "task_failed_exhausted",
                task_id = %id,
                task = %record.name,
                attempts = record.attempts,
                error = %err,
            );
            state.retain_terminal(id, TaskState::FailedExhausted, self.config.retention);
            Ok(TaskState::FailedExhausted)
        }
    }

    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.lock().ok().and_then(|s| s.records.get(&id).cloned())
    }

    /// Records whose retries are exhausted, oldest first
    pub fn dead_letters(&self) -> Vec<TaskRecord> {
        self.lock()
            .map(|s| s.exhausted.iter().filter_map(|id| s.records.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> QueueStats {
        let Ok(state) = self.lock() else {
            return QueueStats::default();
        };
        let mut stats = QueueStats {
            delayed: state.delayed.len(),
            ..Default::default()
        };
        for record in state.records.values() {
            match record.state {
                TaskState::Running => stats.running += 1,
                TaskState::Succeeded => stats.succeeded += 1,
                TaskState::FailedExhausted => stats.failed_exhausted += 1,
                TaskState::Pending => {}
            }
        }
        stats.ready = state
            .records
            .values()
            .filter(|r| r.state == TaskState::Pending)
            .count()
            .saturating_sub(stats.delayed);
        stats
    }

    /// Earliest time a delayed record becomes due
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().ok().and_then(|s| s.delayed.keys().next().map(|(at, _)| *at))
    }

    /// Resolves when new work may be available.
    pub async fn notified(&self) {
        self.available.notified().await
    }
}
