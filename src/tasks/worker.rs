//! # Worker Pool
//!
//! Each worker is a tokio task that claims one record at a time. The handler
//! runs in its own spawned task under the record's timeout, so a panic or a
//! hang affects only that record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::errors::{TaskError, TaskResult};
use super::handler::TaskHandlers;
use super::queue::TaskQueue;
use super::record::{TaskRecord, TaskState};

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    handlers: Arc<TaskHandlers>,
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<TaskQueue>, handlers: Arc<TaskHandlers>, workers: usize, poll_interval: Duration) -> Self {
        Self {
            queue,
            handlers,
            workers: workers.max(1),
            poll_interval,
        }
    }

    /// Claims and runs one task. Returns the resulting state, or `None` when
    /// nothing was claimable.
    pub async fn run_next(&self) -> TaskResult<Option<TaskState>> {
        match self.queue.claim()? {
            Some(record) => execute(&self.queue, &self.handlers, record).await.map(Some),
            None => Ok(None),
        }
    }

    /// Starts the workers; they stop when `shutdown` fires or is dropped.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker| {
                let queue = Arc::clone(&self.queue);
                let handlers = Arc::clone(&self.handlers);
                let poll_interval = self.poll_interval;
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(worker_loop(worker, queue, handlers, poll_interval, shutdown_rx))
            })
            .collect()
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<TaskQueue>,
    handlers: Arc<TaskHandlers>,
    poll_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tracing::debug!(event = "worker_started", worker);

    loop {
        match queue.claim() {
            Ok(Some(record)) => {
                if let Err(e) = execute(&queue, &handlers, record).await {
                    tracing::error!(event = "task_completion_failed", worker, error = %e);
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::error!(event = "task_claim_failed", worker, error = %e),
        }

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = queue.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    tracing::debug!(event = "worker_stopped", worker);
}

async fn execute(queue: &TaskQueue, handlers: &TaskHandlers, record: TaskRecord) -> TaskResult<TaskState> {
    let outcome = match handlers.get(&record.name) {
        None => Err(TaskError::UnknownTask(record.name.clone())),
        Some(handler) => {
            let mut run = tokio::spawn(handler.run(record.payload.clone()));
            match tokio::time::timeout(record.timeout(), &mut run).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(TaskError::Panicked(join_err.to_string())),
                Err(_) => {
                    run.abort();
                    Err(TaskError::Timeout(record.timeout_ms))
                }
            }
        }
    };

    queue.complete(record.id, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{task_fn, QueueConfig, TaskDefinition};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(handlers: TaskHandlers, def: TaskDefinition) -> (Arc<TaskQueue>, WorkerPool) {
        let queue = Arc::new(TaskQueue::new(QueueConfig {
            retry: crate::tasks::RetryPolicy::new(Duration::ZERO),
            ..Default::default()
        }));
        queue.define(def).unwrap();
        let pool = WorkerPool::new(Arc::clone(&queue), Arc::new(handlers), 2, Duration::from_millis(10));
        (queue, pool)
    }

    #[tokio::test]
    async fn test_success() {
        let (queue, pool) = setup(TaskHandlers::new(), TaskDefinition::new("log"));
        let id = queue.enqueue("log", json!({ "hello": "world" })).unwrap();

        assert_eq!(pool.run_next().await.unwrap(), Some(TaskState::Succeeded));
        assert_eq!(queue.get(id).unwrap().attempts, 1);
        assert_eq!(pool.run_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_panic_is_a_failure() {
        let mut handlers = TaskHandlers::new();
        handlers.register(
            "explode",
            task_fn(|_payload: Value| async move {
                if true {
                    panic!("handler bug");
                }
                Ok(())
            }),
        );
        let (queue, pool) = setup(handlers, TaskDefinition::new("explode").with_max_retries(0));
        let id = queue.enqueue("explode", Value::Null).unwrap();

        assert_eq!(pool.run_next().await.unwrap(), Some(TaskState::FailedExhausted));
        assert!(queue.get(id).unwrap().last_error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let mut handlers = TaskHandlers::new();
        handlers.register(
            "slow",
            task_fn(|_payload: Value| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        );
        let def = TaskDefinition::new("slow")
            .with_timeout(Duration::from_millis(20))
            .with_max_retries(0);
        let (queue, pool) = setup(handlers, def);
        queue.enqueue("slow", Value::Null).unwrap();

        assert_eq!(pool.run_next().await.unwrap(), Some(TaskState::FailedExhausted));
        assert_eq!(queue.dead_letters()[0].last_error.as_deref(), Some("Task timeout after 20ms"));
    }

    #[tokio::test]
    async fn test_spawned_workers_drain_queue() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut handlers = TaskHandlers::new();
        let counter = Arc::clone(&runs);
        handlers.register(
            "count",
            task_fn(move |_payload: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let (queue, pool) = setup(handlers, TaskDefinition::new("count"));
        let (shutdown_tx, _) = broadcast::channel(1);
        let workers = pool.spawn(&shutdown_tx);

        for i in 0..5 {
            queue.enqueue("count", json!(i)).unwrap();
        }
        for _ in 0..200 {
            if queue.stats().succeeded == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = shutdown_tx.send(());
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }
}
