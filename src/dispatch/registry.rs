//! Component registry
//!
//! Route tables name their handlers, middleware and catch handlers by id.
//! The registry maps those ids to implementations when the dispatcher is
//! built. Parameterized middleware such as `validate:products` is produced
//! by a factory registered under its prefix (`validate`).

use std::collections::HashMap;
use std::sync::Arc;

use super::chain::{CatchHandler, Handler, Middleware};
use crate::routing::{RouteError, RouteResult};

/// Builds a middleware from the argument part of `prefix:args`
pub type MiddlewareFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Middleware>, String> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ComponentRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    middleware: HashMap<String, Arc<dyn Middleware>>,
    factories: HashMap<String, MiddlewareFactory>,
    catches: HashMap<String, Arc<dyn CatchHandler>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, id: impl Into<String>, handler: impl Handler + 'static) {
        self.handlers.insert(id.into(), Arc::new(handler));
    }

    pub fn register_middleware(&mut self, name: impl Into<String>, middleware: impl Middleware + 'static) {
        self.middleware.insert(name.into(), Arc::new(middleware));
    }

    pub fn register_middleware_factory<F>(&mut self, prefix: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn Middleware>, String> + Send + Sync + 'static,
    {
        self.factories.insert(prefix.into(), Arc::new(factory));
    }

    pub fn register_catch(&mut self, id: impl Into<String>, catch: impl CatchHandler + 'static) {
        self.catches.insert(id.into(), Arc::new(catch));
    }

    pub fn has_handler(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Whether `name` is registered exactly or through a factory prefix
    pub fn has_middleware(&self, name: &str) -> bool {
        self.middleware.contains_key(name) || self.factories.contains_key(name)
    }

    pub fn handler(&self, id: &str) -> RouteResult<Arc<dyn Handler>> {
        self.handlers
            .get(id)
            .cloned()
            .ok_or_else(|| RouteError::UnknownHandler(id.to_string()))
    }

    /// Resolves a middleware name: exact registrations first, then the
    /// factory for the part before the first `:`.
    pub fn middleware(&self, name: &str) -> RouteResult<Arc<dyn Middleware>> {
        if let Some(m) = self.middleware.get(name) {
            return Ok(Arc::clone(m));
        }

        let (prefix, args) = name
            .split_once(':')
            .ok_or_else(|| RouteError::UnknownMiddleware(name.to_string()))?;
        let factory = self
            .factories
            .get(prefix)
            .ok_or_else(|| RouteError::UnknownMiddleware(name.to_string()))?;

        factory(args).map_err(|reason| RouteError::InvalidMiddleware {
            name: name.to_string(),
            reason,
        })
    }

    pub fn catch(&self, id: &str) -> RouteResult<Arc<dyn CatchHandler>> {
        self.catches
            .get(id)
            .cloned()
            .ok_or_else(|| RouteError::UnknownCatchHandler(id.to_string()))
    }

    /// Registered handler ids in sorted order
    pub fn handler_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
