//! # Cron Scheduler
//!
//! Enqueues declared tasks on cron schedules. Occurrences missed while the
//! process was busy collapse into a single enqueue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::errors::{TaskError, TaskResult};
use super::queue::TaskQueue;

/// Longest sleep between scheduler wakeups
const MAX_IDLE: Duration = Duration::from_secs(60);

/// A cron schedule from the routes file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSpec {
    pub cron: String,
    pub task: String,
    #[serde(default)]
    pub payload: Value,
}

struct CronJob {
    spec: ScheduleSpec,
    cron: Cron,
    next_run: Option<DateTime<Utc>>,
}

pub struct CronScheduler {
    queue: Arc<TaskQueue>,
    jobs: Vec<CronJob>,
}

/// Parses a five or six field cron expression.
pub fn parse_cron(expression: &str) -> TaskResult<Cron> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| TaskError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

impl CronScheduler {
    pub fn new(queue: Arc<TaskQueue>, specs: &[ScheduleSpec]) -> TaskResult<Self> {
        Self::starting_at(queue, specs, Utc::now())
    }

    /// Builds the scheduler with first occurrences strictly after `now`.
    pub fn starting_at(queue: Arc<TaskQueue>, specs: &[ScheduleSpec], now: DateTime<Utc>) -> TaskResult<Self> {
        let jobs = specs
            .iter()
            .map(|spec| {
                if !queue.is_defined(&spec.task) {
                    return Err(TaskError::UnknownTask(spec.task.clone()));
                }
                let cron = parse_cron(&spec.cron)?;
                let next_run = cron.find_next_occurrence(&now, false).ok();
                Ok(CronJob {
                    spec: spec.clone(),
                    cron,
                    next_run,
                })
            })
            .collect::<TaskResult<Vec<_>>>()?;

        Ok(Self { queue, jobs })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Earliest upcoming occurrence across all jobs
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.jobs.iter().filter_map(|j| j.next_run).min()
    }

    /// Enqueues every job due at `now` and advances its schedule.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TaskResult<Vec<Uuid>> {
        let mut enqueued = Vec::new();

        for job in &mut self.jobs {
            match job.next_run {
                Some(at) if at <= now => {}
                _ => continue,
            }

            let id = self.queue.enqueue(&job.spec.task, job.spec.payload.clone())?;
            tracing::info!(event = "cron_fired", task = %job.spec.task, cron = %job.spec.cron, task_id = %id);
            enqueued.push(id);

            job.next_run = job.cron.find_next_occurrence(&now, false).ok();
        }

        Ok(enqueued)
    }

    /// Ticks until `shutdown` fires or is dropped.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let wait = match self.next_run() {
                Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(MAX_IDLE),
                None => MAX_IDLE,
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.tick(Utc::now()) {
                        tracing::error!(event = "cron_tick_failed", error = %e);
                    }
                }
            }
        }
    }
}
