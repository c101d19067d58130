//! Serve command: runs the server in the foreground.
//!
//! Startup order:
//! - application cancellation token
//! - shutdown coordinator (SIGTERM/SIGINT or a fatal error)
//! - listener (TCP or Unix socket)
//! - accept loop
//!
//! The function then blocks on the coordinator. Once shutdown is decided it
//! cancels the token, gives the accept loop the configured grace period and
//! returns the shutdown cause.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crud_lifecycle::{SignalCoordinator, create_listener};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::server;

/// Starts the server and blocks until shutdown.
///
/// Returns `Ok(())` for a signal-triggered shutdown and
/// [`AppError::Stopped`] when a component stopped the server with an error.
pub async fn run(config: &AppConfig) -> AppResult<()> {
    let ctx = CancellationToken::new();
    // Cancelled on every exit path, including failed startup.
    let _cancel_on_exit = ctx.clone().drop_guard();

    let coordinator = SignalCoordinator::new(|| {
        info!("Shutdown decided, starting teardown");
    })?;

    let settings = &config.listener;
    let listener = create_listener(
        &ctx,
        settings.kind,
        &settings.unix_path,
        &settings.tcp_address,
    )
    .await?;

    let stop = coordinator.stop_handle();
    let shutdown = coordinator.shutdown_signal();
    let accept_task = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, server::close_connection, shutdown).await {
            stop.stop_with_error(e);
        }
    });

    let result = coordinator.wait().await;

    ctx.cancel();

    let grace = config.shutdown.grace_period();
    match tokio::time::timeout(grace, accept_task).await {
        Ok(Ok(())) => debug!("Accept loop finished"),
        Ok(Err(e)) => warn!(error = %e, "Accept loop task failed"),
        Err(_) => warn!(
            grace_ms = config.shutdown.grace_period_ms,
            "Accept loop did not stop within the grace period"
        ),
    }

    match result {
        Ok(()) => {
            info!("Server stopped");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Server stopped with error");
            Err(AppError::Stopped(e))
        }
    }
}
