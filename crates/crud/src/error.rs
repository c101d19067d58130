//! Application error types.

use thiserror::Error;

use crud_lifecycle::tracing::TracingError;
use crud_lifecycle::{LifecycleError, StopError};

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors that end the process with a failing exit status.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or rendered.
    #[error("configuration error: {0}")]
    Config(String),

    /// Logging could not be initialized.
    #[error("logging error: {0}")]
    Logging(#[from] TracingError),

    /// Startup failed: signal subscription or listener bind.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Shutdown was requested with a fatal cause.
    #[error("server stopped: {0}")]
    Stopped(#[source] StopError),
}

impl AppError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
