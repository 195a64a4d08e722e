//! CLI argument definitions using clap
//!
//! Commands:
//! - mangolo check --project <dir>
//! - mangolo routes --project <dir> [--json]
//! - mangolo serve --project <dir> [--port <port>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mangolo - route, schema and task runtime
#[derive(Parser, Debug)]
#[command(name = "mangolo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and compile the project, then print a summary
    Check {
        /// Project directory containing mangolo.json
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Print the compiled route table
    Routes {
        /// Project directory containing mangolo.json
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Serve HTTP with task workers and cron schedules
    Serve {
        /// Project directory containing mangolo.json
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Command {
    pub fn project_dir(&self) -> &PathBuf {
        match self {
            Command::Check { project } | Command::Routes { project, .. } | Command::Serve { project, .. } => project,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
