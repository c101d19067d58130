//! Shutdown coordination.
//!
//! [`SignalCoordinator`] turns the first of two kinds of event into a single
//! shutdown decision:
//! - SIGTERM/SIGINT (Ctrl+C on non-Unix targets)
//! - an explicit [`StopHandle::request_stop`] call, usually from a task that
//!   hit a fatal error
//!
//! The decision is taken with a compare-and-swap, so concurrent triggers can
//! never both apply. The winner runs the `on_shutdown` callback and only then
//! publishes the outcome, which releases every waiter with the same value.
//! A panicking callback still publishes the outcome.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{LifecycleError, LifecycleResult};

/// Cause attached to an explicit stop. Shared so every waiter sees it.
pub type StopError = Arc<dyn StdError + Send + Sync + 'static>;

/// OS signals the coordinator subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignalKind {
    /// SIGINT, or Ctrl+C on non-Unix targets.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for ShutdownSignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// The recorded cause of shutdown. Written at most once.
#[derive(Debug, Clone)]
pub enum ShutdownOutcome {
    /// A subscribed OS signal arrived first.
    Signal(ShutdownSignalKind),
    /// `request_stop` was called first. `None` behaves like a signal.
    Requested(Option<StopError>),
}

impl ShutdownOutcome {
    /// Returns the explicit stop error, if one was recorded.
    pub fn error(&self) -> Option<&StopError> {
        match self {
            Self::Signal(_) | Self::Requested(None) => None,
            Self::Requested(Some(err)) => Some(err),
        }
    }

    /// Converts the outcome into the value handed to waiters.
    pub fn into_result(self) -> Result<(), StopError> {
        match self {
            Self::Signal(_) | Self::Requested(None) => Ok(()),
            Self::Requested(Some(err)) => Err(err),
        }
    }
}

type Callback = Box<dyn Fn() + Send + Sync>;

struct Shared {
    decided: AtomicBool,
    outcome: watch::Sender<Option<ShutdownOutcome>>,
    on_shutdown: Callback,
}

impl Shared {
    /// Records `outcome` unless a shutdown was already decided.
    fn decide(&self, outcome: ShutdownOutcome) -> bool {
        if self
            .decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(?outcome, "Shutdown already decided, ignoring");
            return false;
        }

        // Publishes on drop, so waiters are released even if the callback
        // panics.
        let _publish = Publish {
            sender: &self.outcome,
            outcome: Some(outcome),
        };
        (self.on_shutdown)();
        true
    }

    fn is_decided(&self) -> bool {
        self.decided.load(Ordering::Acquire)
    }
}

struct Publish<'a> {
    sender: &'a watch::Sender<Option<ShutdownOutcome>>,
    outcome: Option<ShutdownOutcome>,
}

impl Drop for Publish<'_> {
    fn drop(&mut self) {
        if let Some(outcome) = self.outcome.take() {
            self.sender.send_replace(Some(outcome));
        }
    }
}

/// Owns the OS signal subscription and the one-shot shutdown outcome.
///
/// Each coordinator installs its own signal streams, so several coordinators
/// in one process (as in tests) all observe a delivered signal independently.
/// Dropping the coordinator stops its signal listener task.
pub struct SignalCoordinator {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl SignalCoordinator {
    /// Subscribes to shutdown signals and returns the coordinator.
    ///
    /// `on_shutdown` runs exactly once, on whichever context decides the
    /// shutdown, before any waiter is released.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<F>(on_shutdown: F) -> LifecycleResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (outcome, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            decided: AtomicBool::new(false),
            outcome,
            on_shutdown: Box::new(on_shutdown),
        });

        let listener = spawn_listener(shared.clone()).map_err(LifecycleError::SignalInstall)?;

        Ok(Self { shared, listener })
    }

    /// Waits until a shutdown is decided and returns its cause.
    ///
    /// `Ok(())` for a signal or a `request_stop(None)`, otherwise the error
    /// passed to the winning `request_stop`. Any number of callers may wait;
    /// they all observe the same outcome.
    pub async fn wait(&self) -> Result<(), StopError> {
        self.outcome().await.into_result()
    }

    /// Waits until a shutdown is decided and returns the full outcome.
    pub async fn outcome(&self) -> ShutdownOutcome {
        wait_decided(self.shared.outcome.subscribe()).await
    }

    /// Requests a shutdown with an optional cause.
    ///
    /// Returns `true` if this call decided the shutdown, `false` if it was
    /// already decided (in which case nothing happens).
    pub fn request_stop(&self, err: Option<StopError>) -> bool {
        self.shared.decide(ShutdownOutcome::Requested(err))
    }

    /// Returns true once a shutdown has been decided.
    ///
    /// This turns true as soon as a trigger wins, which is before
    /// `on_shutdown` finishes and before waiters are released.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_decided()
    }

    /// Returns a cloneable handle for requesting shutdown from other tasks.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Returns a future-producing signal for use in `select!` loops.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shared.outcome.subscribe(),
        }
    }
}

impl Drop for SignalCoordinator {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl fmt::Debug for SignalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalCoordinator")
            .field("outcome", &*self.shared.outcome.borrow())
            .finish_non_exhaustive()
    }
}

/// A handle for requesting or observing shutdown from other components.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Requests a shutdown with an optional cause. See
    /// [`SignalCoordinator::request_stop`].
    pub fn request_stop(&self, err: Option<StopError>) -> bool {
        self.shared.decide(ShutdownOutcome::Requested(err))
    }

    /// Requests a shutdown caused by `err`.
    pub fn stop_with_error<E>(&self, err: E) -> bool
    where
        E: StdError + Send + Sync + 'static,
    {
        self.request_stop(Some(Arc::new(err)))
    }

    /// Returns true once a shutdown has been decided. See
    /// [`SignalCoordinator::is_shutdown`].
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_decided()
    }

    /// Returns a future-producing signal that completes on shutdown.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shared.outcome.subscribe(),
        }
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// A signal that completes once shutdown is decided.
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<ShutdownOutcome>>,
}

impl ShutdownSignal {
    /// Waits for the shutdown decision.
    pub async fn wait(self) -> ShutdownOutcome {
        wait_decided(self.rx).await
    }
}

async fn wait_decided(mut rx: watch::Receiver<Option<ShutdownOutcome>>) -> ShutdownOutcome {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // The sender lives in `Shared`; a closed channel means nothing
            // can ever decide, so park forever like an undecided waiter.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
fn spawn_listener(shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let decided = shared.outcome.subscribe();

    Ok(tokio::spawn(async move {
        let kind = tokio::select! {
            _ = sigterm.recv() => ShutdownSignalKind::Terminate,
            _ = sigint.recv() => ShutdownSignalKind::Interrupt,
            _ = wait_decided(decided) => {
                debug!("Shutdown decided elsewhere, signal listener stopped");
                return;
            }
        };

        info!(signal = %kind, "Received shutdown signal");
        shared.decide(ShutdownOutcome::Signal(kind));
        debug!("Signal listener stopped");
    }))
}

#[cfg(not(unix))]
fn spawn_listener(shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    let decided = shared.outcome.subscribe();

    Ok(tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Received Ctrl+C, initiating shutdown");
                    shared.decide(ShutdownOutcome::Signal(ShutdownSignalKind::Interrupt));
                }
            }
            _ = wait_decided(decided) => {}
        }
        debug!("Signal listener stopped");
    }))
}
