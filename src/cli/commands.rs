//! CLI command implementations
//!
//! The stock binary runs projects with the built-in handlers, middleware and
//! the `log` task. Applications with their own components build an
//! [`Application`](crate::project::Application) in code instead.

use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{LogConfig, ProjectConfig};
use crate::project::{Application, Project};
use crate::telemetry;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_lines, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    init_logging(cli.command.project_dir(), cli.verbose);

    match run_command(cli.command) {
        Ok(()) => Ok(()),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Check { project } => write_response(check(&project)?),
        Command::Routes { project, json } => {
            let routes = routes(&project)?;
            if json {
                write_response(serde_json::to_value(&routes)?)
            } else {
                write_lines(&routes.iter().map(RouteLine::render).collect::<Vec<_>>())
            }
        }
        Command::Serve { project, port } => serve(&project, port),
    }
}

/// The log section is read before the project so that loading is logged
/// with the configured format. Load failures surface from the command.
fn init_logging(project_dir: &Path, verbose: bool) {
    let log = ProjectConfig::load(project_dir)
        .map(|c| c.log)
        .unwrap_or_else(|_| LogConfig::default());
    telemetry::init(&log, verbose);
}

fn build(project_dir: &Path) -> CliResult<(Project, Application)> {
    let project = Project::load(project_dir)?;
    let app = project.application().build()?;
    Ok((project, app))
}

/// Loads and compiles everything and summarizes the result.
pub fn check(project_dir: &Path) -> CliResult<Value> {
    let (project, app) = build(project_dir)?;

    Ok(json!({
        "project": project.config.name,
        "schemas": project.schemas.names(),
        "routes": app.dispatcher.table().len(),
        "catch_handlers": project.routes.catch.len(),
        "tasks": app.queue.definitions().into_iter().map(|d| d.name).collect::<Vec<_>>(),
        "schedules": project.routes.schedules.len(),
        "execution_timeout_ms": project.config.runtime.execution_timeout_ms,
    }))
}

/// One row of `mangolo routes`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLine {
    pub method: String,
    pub path: String,
    pub middleware: Vec<String>,
    pub handler: String,
}

impl RouteLine {
    pub fn render(&self) -> String {
        format!(
            "{:<7} {:<32} [{}] -> {}",
            self.method,
            self.path,
            self.middleware.join(", "),
            self.handler
        )
    }
}

/// Compiled routes in resolution order per method
pub fn routes(project_dir: &Path) -> CliResult<Vec<RouteLine>> {
    let (_, app) = build(project_dir)?;

    Ok(app
        .dispatcher
        .table()
        .routes()
        .map(|entry| RouteLine {
            method: entry.method.to_string(),
            path: entry.pattern.to_string(),
            middleware: entry.middleware.clone(),
            handler: entry.handler.handler_id.clone(),
        })
        .collect())
}

/// Serves until Ctrl-C.
pub fn serve(project_dir: &Path, port: Option<u16>) -> CliResult<()> {
    let (_, mut app) = build(project_dir)?;
    if let Some(port) = port {
        app.config.server.port = port;
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::io_error(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(event = "signal_handler_failed", error = %e);
            }
        };
        app.serve(shutdown).await
    })?;

    Ok(())
}
