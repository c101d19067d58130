//! Lifecycle error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::listener::ListenerKind;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors surfaced synchronously while setting up the process lifecycle.
///
/// Permission repair on a Unix socket never produces one of these; its
/// failures are only logged.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The bind syscall failed. `source` is the OS error as returned.
    #[error("failed to bind {kind} listener on {address}: {source}")]
    Bind {
        kind: ListenerKind,
        address: String,
        #[source]
        source: io::Error,
    },

    /// A file occupying the socket path could not be removed.
    #[error("failed to remove stale socket {}: {source}", path.display())]
    StaleSocketRemoval {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// OS signal subscription could not be installed.
    #[error("failed to install shutdown signal handler: {0}")]
    SignalInstall(#[source] io::Error),

    /// The requested listener kind is not available on this platform.
    #[error("{kind} listeners are not supported on this platform")]
    UnsupportedListener { kind: ListenerKind },
}

impl LifecycleError {
    /// Creates a bind error.
    pub fn bind(kind: ListenerKind, address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            kind,
            address: address.into(),
            source,
        }
    }

    /// Creates a stale socket removal error.
    pub fn stale_socket(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StaleSocketRemoval {
            path: path.into(),
            source,
        }
    }

    /// Returns the underlying OS error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Bind { source, .. }
            | Self::StaleSocketRemoval { source, .. }
            | Self::SignalInstall(source) => Some(source),
            Self::UnsupportedListener { .. } => None,
        }
    }
}
