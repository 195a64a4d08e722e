//! # Project Loading
//!
//! A project directory holds `mangolo.json`, a schema directory and the
//! compiled routes file. [`Project::load`] reads and checks all three;
//! [`ApplicationBuilder`] binds them to a store and to the components
//! registered in code, producing a runnable [`Application`].

mod builtins;
mod errors;
mod routes;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub use errors::{ProjectError, ProjectResult};
pub use routes::RouteFile;

use crate::auth::{AuthProvider, JwtAuthProvider};
use crate::config::ProjectConfig;
use crate::crud::register_crud;
use crate::dispatch::{CatchHandler, ComponentRegistry, Dispatcher, Handler, Middleware, RequestContext, Response};
use crate::http_server::HttpServer;
use crate::schema::SchemaRegistry;
use crate::store::{InMemoryStore, Store};
use crate::tasks::{CronScheduler, TaskDefinition, TaskHandler, TaskHandlers, TaskQueue, WorkerPool};
use crate::transaction::TransactionCoordinator;

/// A loaded and checked project
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub schemas: Arc<SchemaRegistry>,
    pub routes: RouteFile,
}

impl Project {
    pub fn load(root: &Path) -> ProjectResult<Self> {
        let config = ProjectConfig::load(root)?;
        let schemas = SchemaRegistry::load_dir(&root.join(&config.schemas_dir))?;
        let routes = RouteFile::load(&root.join(&config.routes_file))?;

        tracing::info!(
            event = "project_loaded",
            project = %config.name,
            root = %root.display(),
            schemas = schemas.len(),
            routes = routes.routes.len(),
            tasks = routes.tasks.len(),
        );

        Ok(Self {
            root: root.to_path_buf(),
            config,
            schemas: Arc::new(schemas),
            routes,
        })
    }

    /// Project assembled in memory
    pub fn from_parts(config: ProjectConfig, schemas: SchemaRegistry, routes: RouteFile) -> Self {
        Self {
            root: PathBuf::from("."),
            config,
            schemas: Arc::new(schemas),
            routes,
        }
    }

    pub fn application(&self) -> ApplicationBuilder<'_> {
        ApplicationBuilder {
            project: self,
            store: None,
            components: ComponentRegistry::new(),
            task_handlers: TaskHandlers::new(),
            auth: None,
        }
    }
}

/// Binds a project to its store and code components
pub struct ApplicationBuilder<'p> {
    project: &'p Project,
    store: Option<Arc<dyn Store>>,
    components: ComponentRegistry,
    task_handlers: TaskHandlers,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl<'p> ApplicationBuilder<'p> {
    /// Defaults to a fresh [`InMemoryStore`].
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the JWT provider built from `auth.jwt_secret`.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Handlers registered here take precedence over built-in CRUD ids.
    pub fn handler(mut self, id: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.components.register_handler(id, handler);
        self
    }

    pub fn middleware(mut self, name: impl Into<String>, middleware: impl Middleware + 'static) -> Self {
        self.components.register_middleware(name, middleware);
        self
    }

    pub fn catch(mut self, id: impl Into<String>, catch: impl CatchHandler + 'static) -> Self {
        self.components.register_catch(id, catch);
        self
    }

    pub fn task(mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.task_handlers.register(name, handler);
        self
    }

    pub fn build(self) -> ProjectResult<Application> {
        let project = self.project;
        let config = &project.config;

        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let coordinator = TransactionCoordinator::new(Arc::clone(&store));

        let jwt = config.jwt_config().map(|c| Arc::new(JwtAuthProvider::new(c)));
        let auth = self
            .auth
            .or_else(|| jwt.clone().map(|p| p as Arc<dyn AuthProvider>));

        let mut components = self.components;
        register_crud(&mut components, &project.schemas, &coordinator);
        builtins::register_middleware(&mut components, &project.schemas, auth);

        let dispatcher = Dispatcher::from_specs(
            &project.routes.routes,
            &project.routes.catch,
            &components,
            config.execution_timeout(),
        )?;

        let queue = Arc::new(TaskQueue::new(config.tasks.queue_config()));
        if !project.routes.tasks.iter().any(|t| t.name == "log") {
            queue.define(TaskDefinition::new("log"))?;
        }
        for def in &project.routes.tasks {
            if !self.task_handlers.contains(&def.name) {
                return Err(ProjectError::MissingTaskHandler(def.name.clone()));
            }
            queue.define(def.clone())?;
        }
        let cron = CronScheduler::new(Arc::clone(&queue), &project.routes.schedules)?;

        tracing::info!(
            event = "application_built",
            project = %config.name,
            routes = dispatcher.table().len(),
            schedules = cron.len(),
        );

        Ok(Application {
            config: config.clone(),
            schemas: Arc::clone(&project.schemas),
            store,
            coordinator,
            dispatcher: Arc::new(dispatcher),
            queue,
            task_handlers: Arc::new(self.task_handlers),
            cron,
            jwt,
        })
    }
}

/// A runnable project
pub struct Application {
    pub config: ProjectConfig,
    pub schemas: Arc<SchemaRegistry>,
    pub store: Arc<dyn Store>,
    pub coordinator: TransactionCoordinator,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<TaskQueue>,
    task_handlers: Arc<TaskHandlers>,
    cron: CronScheduler,
    jwt: Option<Arc<JwtAuthProvider>>,
}

impl Application {
    pub async fn dispatch(&self, ctx: RequestContext) -> Response {
        self.dispatcher.dispatch(ctx).await
    }

    /// JWT provider built from the configured secret
    pub fn jwt(&self) -> Option<&JwtAuthProvider> {
        self.jwt.as_deref()
    }

    pub fn workers(&self) -> WorkerPool {
        WorkerPool::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.task_handlers),
            self.config.tasks.workers,
            self.config.tasks.poll_interval(),
        )
    }

    /// Serves HTTP with task workers and the cron scheduler until
    /// `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> ProjectResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, _) = broadcast::channel(1);
        let workers = self.workers().spawn(&shutdown_tx);
        let cron = tokio::spawn(self.cron.run(shutdown_tx.subscribe()));

        let server = HttpServer::new(self.config.server.clone(), Arc::clone(&self.dispatcher));
        let served = server.start(shutdown).await;

        let _ = shutdown_tx.send(());
        for (index, worker) in workers.into_iter().enumerate() {
            join_background(format!("worker-{}", index), worker).await;
        }
        join_background("cron".to_string(), cron).await;
        tracing::info!(event = "application_stopped", project = %self.config.name);

        served.map_err(|e| ProjectError::Server(e.to_string()))
    }
}

/// Waits for a background task. Returns false when it panicked or was
/// cancelled.
async fn join_background(name: String, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(event = "worker_join_failed", task = %name, panicked = e.is_panic(), error = %e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{handler_fn, RouteSpec};
    use crate::routing::Method;
    use crate::schema::{FieldKind, FieldSpec, ObjectSchema};
    use crate::tasks::task_fn;
    use serde_json::{json, Value};

    fn project(routes: RouteFile) -> Project {
        let mut schemas = SchemaRegistry::new();
        schemas
            .register(ObjectSchema::new(
                "products",
                vec![FieldSpec::new("name", FieldKind::string()).required()],
            ))
            .unwrap();
        Project::from_parts(ProjectConfig::default(), schemas, routes)
    }

    fn route(method: Method, path: &str, middleware: &[&str], handler: &str) -> RouteSpec {
        RouteSpec {
            method,
            path: path.into(),
            middleware: middleware.iter().map(|m| m.to_string()).collect(),
            handler: handler.into(),
            catch: None,
        }
    }

    #[tokio::test]
    async fn test_builtin_crud_routes() {
        let project = project(RouteFile {
            routes: vec![
                route(Method::Post, "/products", &["parse_json", "validate:products"], "products.create"),
                route(Method::Get, "/products/:id", &[], "products.get"),
            ],
            ..Default::default()
        });
        let app = project.application().build().unwrap();

        let created = app
            .dispatch(RequestContext::new(Method::Post, "/products").with_json(&json!({ "name": "Lamp" })))
            .await;
        assert_eq!(created.status, 201);

        let id = created.body["id"].as_str().unwrap().to_string();
        let fetched = app
            .dispatch(RequestContext::new(Method::Get, format!("/products/{}", id)))
            .await;
        assert_eq!(fetched.body["name"], "Lamp");
    }

    #[test]
    fn test_code_handlers_override_builtins() {
        let project = project(RouteFile {
            routes: vec![route(Method::Get, "/products/:id", &[], "products.get")],
            ..Default::default()
        });
        let app = project
            .application()
            .handler("products.get", handler_fn(|_ctx| Ok(Response::ok(json!("custom")))))
            .build()
            .unwrap();
        assert_eq!(app.dispatcher.table().len(), 1);
    }

    #[test]
    fn test_unknown_components_fail_build() {
        let missing_handler = project(RouteFile {
            routes: vec![route(Method::Get, "/x", &[], "nope")],
            ..Default::default()
        });
        assert!(matches!(missing_handler.application().build(), Err(ProjectError::Route(_))));

        let no_auth = project(RouteFile {
            routes: vec![route(Method::Get, "/x", &["authenticate"], "products.list")],
            ..Default::default()
        });
        assert!(matches!(no_auth.application().build(), Err(ProjectError::Route(_))));
    }

    #[test]
    fn test_declared_tasks_need_handlers() {
        let routes = RouteFile {
            tasks: vec![TaskDefinition::new("send_email")],
            ..Default::default()
        };
        let project = project(routes);
        assert!(matches!(
            project.application().build(),
            Err(ProjectError::MissingTaskHandler(_))
        ));

        let app = project
            .application()
            .task("send_email", task_fn(|_payload: Value| async { Ok(()) }))
            .build()
            .unwrap();
        assert!(app.queue.is_defined("send_email"));
        assert!(app.queue.is_defined("log"));
    }

    #[tokio::test]
    async fn test_join_background_reports_panics() {
        let finished = tokio::spawn(async {});
        assert!(join_background("worker-0".to_string(), finished).await);

        let panicked = tokio::spawn(async { panic!("worker crashed") });
        assert!(!join_background("worker-1".to_string(), panicked).await);

        let cancelled = tokio::spawn(tokio::time::sleep(std::time::Duration::from_secs(60)));
        cancelled.abort();
        assert!(!join_background("cron".to_string(), cancelled).await);
    }
}
