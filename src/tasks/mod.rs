//! Task Queue Coordinator
//!
//! Queued and scheduled units of work, dispatched to a worker pool with
//! priority ordering, rate limiting and exponential retry backoff.

mod cron;
mod errors;
mod handler;
mod policy;
mod queue;
mod record;
mod worker;

pub use cron::{parse_cron, CronScheduler, ScheduleSpec};
pub use errors::{TaskError, TaskResult};
pub use handler::{task_fn, FnTask, LogTask, TaskFuture, TaskHandler, TaskHandlers};
pub use policy::RetryPolicy;
pub use queue::{QueueConfig, QueueStats, TaskQueue, TieBreak};
pub use record::{Priority, TaskDefinition, TaskRecord, TaskState};
pub use worker::WorkerPool;
