//! mangolo - route, schema and task runtime
//!
//! A project is a directory with `mangolo.json`, object schemas under
//! `schemas/` and a `routes.json` declaring routes, catch handlers, tasks
//! and cron schedules. [`project::Project`] loads it and builds an
//! [`project::Application`]: a dispatcher over the compiled route table,
//! a transactional store and a task queue with workers.

pub mod auth;
pub mod cli;
pub mod config;
pub mod crud;
pub mod dispatch;
pub mod http_server;
pub mod project;
pub mod routing;
pub mod schema;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod transaction;
