//! # HTTP Server
//!
//! Serves a project's dispatcher over HTTP with axum.

pub mod config;
pub mod server;

pub use config::HttpServerConfig;
pub use server::HttpServer;
