//! CLI module for mangolo
//!
//! Provides command-line interface for:
//! - check: Load and compile a project
//! - routes: Print the compiled route table
//! - serve: Run the HTTP server, task workers and cron schedules

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check, routes, run, run_command, serve, RouteLine};
pub use errors::{CliError, CliErrorCode, CliResult};
