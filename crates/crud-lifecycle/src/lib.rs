//! Process lifecycle for the crud server.
//!
//! This crate owns the parts of startup and shutdown that have to be right
//! under concurrency:
//! - [`SignalCoordinator`]: one race-free shutdown decision from either an OS
//!   signal or an explicit stop request
//! - [`create_listener`]: a ready-to-accept TCP or Unix socket listener
//! - [`SocketPermissionFixer`]: bounded background permission repair for
//!   Unix socket files
//!
//! # Example
//!
//! ```rust,no_run
//! use crud_lifecycle::{ListenerKind, SignalCoordinator, create_listener};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = CancellationToken::new();
//!     let coordinator = SignalCoordinator::new(|| eprintln!("shutting down"))?;
//!     let listener = create_listener(&ctx, ListenerKind::Tcp, "", "8181").await?;
//!
//!     // Hand `listener` to the server...
//!     let _ = listener;
//!
//!     coordinator.wait().await?;
//!     ctx.cancel();
//!     Ok(())
//! }
//! ```

mod error;
mod listener;
mod permissions;
mod signals;
pub mod tracing;

pub use error::{LifecycleError, LifecycleResult};
pub use listener::{
    Connection, Listener, ListenerAddr, ListenerKind, create_listener, normalize_tcp_address,
};
pub use permissions::{
    Exhaustion, FixOutcome, RetryBudget, SOCKET_MODE, SocketPermissionFixer,
    relax_socket_permissions,
};
pub use signals::{
    ShutdownOutcome, ShutdownSignal, ShutdownSignalKind, SignalCoordinator, StopError, StopHandle,
};
