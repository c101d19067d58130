//! Product CRUD server entrypoint.
//!
//! This crate provides the `crud` binary: command-line parsing,
//! configuration, and the accept loop that sits between the lifecycle
//! layer in `crud-lifecycle` and the product router.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod server;

pub use cli::Cli;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
