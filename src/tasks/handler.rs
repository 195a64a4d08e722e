//! Task handlers
//!
//! Task names declared in the routes file are bound to handlers registered
//! in code. The `log` handler is always available.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::errors::TaskResult;

/// Boxed future of one task run
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult<()>> + Send + 'static>>;

pub trait TaskHandler: Send + Sync {
    fn run(&self, payload: Value) -> TaskFuture;
}

/// Handler backed by an async function
pub struct FnTask<F>(F);

pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult<()>> + Send + 'static,
{
    FnTask(f)
}

impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult<()>> + Send + 'static,
{
    fn run(&self, payload: Value) -> TaskFuture {
        Box::pin((self.0)(payload))
    }
}

/// Built-in `log` task: writes its payload to the log
#[derive(Debug, Default)]
pub struct LogTask;

impl TaskHandler for LogTask {
    fn run(&self, payload: Value) -> TaskFuture {
        Box::pin(async move {
            tracing::info!(event = "task_log", payload = %payload);
            Ok(())
        })
    }
}

/// Task name to handler
#[derive(Clone)]
pub struct TaskHandlers {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl Default for TaskHandlers {
    fn default() -> Self {
        let mut handlers = Self {
            handlers: HashMap::new(),
        };
        handlers.register("log", LogTask);
        handlers
    }
}

impl TaskHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
