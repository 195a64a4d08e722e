//! Task Queue Tests
//!
//! - A failing task runs exactly `max_retries + 1` times, then is listed as
//!   failed-exhausted
//! - Eligible tasks run by priority, then enqueue time
//! - Delayed tasks wait for their target time
//! - Cron schedules enqueue due tasks

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mangolo::tasks::{
    task_fn, CronScheduler, Priority, QueueConfig, ScheduleSpec, TaskDefinition, TaskError, TaskHandlers, TaskQueue,
    TaskState, WorkerPool,
};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn pool(queue: &Arc<TaskQueue>, handlers: TaskHandlers) -> WorkerPool {
    WorkerPool::new(Arc::clone(queue), Arc::new(handlers), 1, Duration::from_millis(10))
}

/// Runs claimable tasks until none is ready or delayed, or the deadline
/// passes.
async fn drain(queue: &TaskQueue, workers: &WorkerPool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let stats = queue.stats();
        if stats.ready == 0 && stats.delayed == 0 && stats.running == 0 {
            return;
        }
        if workers.run_next().await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_exactly_four_attempts_with_three_retries() {
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    queue
        .define(
            TaskDefinition::new("flaky")
                .with_timeout(Duration::from_millis(5))
                .with_max_retries(3),
        )
        .unwrap();

    let runs = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&runs);
    let mut handlers = TaskHandlers::new();
    handlers.register(
        "flaky",
        task_fn(move |_payload| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::failed("upstream unavailable"))
            }
        }),
    );
    let workers = pool(&queue, handlers);

    let id = queue.enqueue("flaky", json!({ "order": 7 })).unwrap();
    drain(&queue, &workers).await;

    assert_eq!(runs.load(Ordering::SeqCst), 4);
    let record = queue.get(id).unwrap();
    assert_eq!(record.state, TaskState::FailedExhausted);
    assert_eq!(record.attempts, 4);
    assert!(record.last_error.is_some());
    assert_eq!(queue.dead_letters().len(), 1);
    assert_eq!(queue.stats().failed_exhausted, 1);
}

#[tokio::test]
async fn test_retry_succeeds_before_exhaustion() {
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    queue
        .define(TaskDefinition::new("eventually").with_timeout(Duration::from_millis(5)).with_max_retries(3))
        .unwrap();

    let runs = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&runs);
    let mut handlers = TaskHandlers::new();
    handlers.register(
        "eventually",
        task_fn(move |_payload| {
            let attempt = counted.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 2 {
                    Err(TaskError::failed("not yet"))
                } else {
                    Ok(())
                }
            }
        }),
    );
    let workers = pool(&queue, handlers);

    let id = queue.enqueue("eventually", Value::Null).unwrap();
    drain(&queue, &workers).await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(queue.get(id).unwrap().state, TaskState::Succeeded);
    assert!(queue.dead_letters().is_empty());
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_priority_then_enqueue_order() {
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    queue.define(TaskDefinition::new("low").with_priority(Priority::Low)).unwrap();
    queue.define(TaskDefinition::new("normal")).unwrap();
    queue.define(TaskDefinition::new("high").with_priority(Priority::High)).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handlers = TaskHandlers::new();
    for name in ["low", "normal", "high"] {
        let order = Arc::clone(&order);
        handlers.register(
            name,
            task_fn(move |payload: Value| {
                order.lock().unwrap().push(payload["n"].as_i64().unwrap_or(-1));
                async { Ok(()) }
            }),
        );
    }
    let workers = pool(&queue, handlers);

    queue.enqueue("low", json!({ "n": 1 })).unwrap();
    queue.enqueue("normal", json!({ "n": 2 })).unwrap();
    queue.enqueue("high", json!({ "n": 3 })).unwrap();
    queue.enqueue("normal", json!({ "n": 4 })).unwrap();
    drain(&queue, &workers).await;

    assert_eq!(*order.lock().unwrap(), vec![3, 2, 4, 1]);
}

#[test]
fn test_delayed_task_not_claimable_early() {
    let queue = TaskQueue::new(QueueConfig::default());
    queue.define(TaskDefinition::new("later")).unwrap();

    let now = Utc::now();
    let id = queue
        .schedule_at("later", json!({}), now + chrono::Duration::minutes(5), None)
        .unwrap();

    assert!(queue.claim_at(now).unwrap().is_none());
    assert_eq!(queue.stats().delayed, 1);

    let claimed = queue.claim_at(now + chrono::Duration::minutes(5)).unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.state, TaskState::Running);
}

#[test]
fn test_unknown_task_rejected() {
    let queue = TaskQueue::new(QueueConfig::default());
    assert!(matches!(queue.enqueue("nope", Value::Null), Err(TaskError::UnknownTask(_))));
}

// =============================================================================
// Cron
// =============================================================================

#[test]
fn test_cron_enqueues_each_due_occurrence_once() {
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    queue.define(TaskDefinition::new("log")).unwrap();

    let start = Utc.with_ymd_and_hms(2024, 3, 1, 2, 59, 0).unwrap();
    let mut cron = CronScheduler::starting_at(
        Arc::clone(&queue),
        &[ScheduleSpec {
            cron: "0 3 * * *".into(),
            task: "log".into(),
            payload: json!({ "job": "nightly" }),
        }],
        start,
    )
    .unwrap();

    assert!(cron.tick(start).unwrap().is_empty());
    let three = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
    assert_eq!(cron.tick(three).unwrap().len(), 1);
    assert!(cron.tick(three).unwrap().is_empty());
    assert_eq!(queue.stats().ready, 1);
    assert_eq!(cron.next_run(), Some(Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap()));
}
