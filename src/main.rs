//! mangolo CLI entry point
//!
//! Parses arguments and delegates to the CLI module. Errors were already
//! reported on stdout; the process exits non-zero.

use mangolo::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
