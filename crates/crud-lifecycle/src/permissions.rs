//! Background permission repair for Unix socket files.
//!
//! A freshly bound socket inherits its mode from the process umask, which
//! often keeps other local users (a reverse proxy, for instance) from
//! connecting. [`SocketPermissionFixer`] widens the mode to `0o666` on a short
//! retry loop that runs beside the server and never delays it.
//!
//! The loop is bounded three ways: a [`RetryBudget`] attempt cap, an overall
//! timeout, and cancellation of the caller's token. Running out of budget is
//! a soft failure that only shows up in the logs.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mode applied to socket files: read/write for owner, group and others.
pub const SOCKET_MODE: u32 = 0o666;

/// Retry policy for the fixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Delay before each attempt.
    pub interval: Duration,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Overall time allowed, measured from launch.
    pub timeout: Duration,
}

impl RetryBudget {
    /// The policy used for every socket created by the listener factory.
    pub const DEFAULT: Self = Self {
        interval: Duration::from_millis(100),
        max_attempts: 5,
        timeout: Duration::from_millis(500),
    };
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why the fixer gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// `max_attempts` attempts failed.
    Attempts,
    /// The overall timeout elapsed.
    Timeout,
}

/// Terminal state of a fixer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// The mode was applied and the file still exists.
    Succeeded { attempts: u32 },
    /// The budget ran out first.
    Exhausted { attempts: u32, reason: Exhaustion },
    /// The parent token was cancelled first.
    Canceled { attempts: u32 },
}

/// Applies [`SOCKET_MODE`] to `path` and confirms the file is still there.
///
/// The existence check catches a socket removed between the chmod and now.
#[cfg(unix)]
pub fn relax_socket_permissions(path: &Path) -> io::Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))?;
    fs::metadata(path)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn relax_socket_permissions(_path: &Path) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Time-bounded task that relaxes a socket file's permissions.
///
/// Idle until [`spawn`](Self::spawn) or [`run`](Self::run), then Attempting
/// until it ends in one of the [`FixOutcome`] states.
#[derive(Debug, Clone)]
pub struct SocketPermissionFixer {
    path: PathBuf,
    budget: RetryBudget,
}

impl SocketPermissionFixer {
    /// Creates a fixer for `path` with [`RetryBudget::DEFAULT`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            budget: RetryBudget::DEFAULT,
        }
    }

    /// Builder: set the retry budget.
    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Returns the socket path this fixer works on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Launches the fixer on a child of `parent`.
    ///
    /// The caller may drop the handle; the task still ends on its own once
    /// its budget runs out or `parent` is cancelled.
    pub fn spawn(self, parent: &CancellationToken) -> JoinHandle<FixOutcome> {
        let token = parent.child_token();
        tokio::spawn(self.run(token))
    }

    /// Runs the retry loop to completion.
    pub async fn run(self, token: CancellationToken) -> FixOutcome {
        let deadline = Instant::now() + self.budget.timeout;
        let mut attempts = 0;

        debug!(path = %self.path.display(), "Socket permission fixer started");

        let outcome = loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break FixOutcome::Canceled { attempts },
                _ = sleep_until(deadline) => {
                    break FixOutcome::Exhausted { attempts, reason: Exhaustion::Timeout };
                }
                _ = sleep(self.budget.interval) => {
                    attempts += 1;
                    debug!(path = %self.path.display(), attempt = attempts, "Relaxing socket permissions");

                    match relax_socket_permissions(&self.path) {
                        Ok(()) => break FixOutcome::Succeeded { attempts },
                        Err(e) => {
                            debug!(path = %self.path.display(), attempt = attempts, error = %e, "Permission attempt failed");
                        }
                    }

                    if attempts >= self.budget.max_attempts {
                        break FixOutcome::Exhausted { attempts, reason: Exhaustion::Attempts };
                    }
                }
            }
        };

        match outcome {
            FixOutcome::Succeeded { attempts } => {
                info!(path = %self.path.display(), attempts, "Unix socket is ready for peers");
            }
            FixOutcome::Exhausted { attempts, reason } => {
                warn!(
                    path = %self.path.display(),
                    attempts,
                    reason = ?reason,
                    "Gave up relaxing unix socket permissions"
                );
            }
            FixOutcome::Canceled { attempts } => {
                debug!(path = %self.path.display(), attempts, "Socket permission fixer cancelled");
            }
        }

        outcome
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn fixer_widens_socket_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.sock");
        let _listener = UnixListener::bind(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let outcome = SocketPermissionFixer::new(&path)
            .run(CancellationToken::new())
            .await;

        assert_eq!(outcome, FixOutcome::Succeeded { attempts: 1 });
        assert_eq!(mode(&path), SOCKET_MODE);
    }

    #[tokio::test]
    async fn fixer_exhausts_when_socket_vanishes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let listener = UnixListener::bind(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let started = std::time::Instant::now();
        let handle = SocketPermissionFixer::new(&path).spawn(&CancellationToken::new());
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("fixer must finish within its budget")
            .unwrap();

        assert!(matches!(outcome, FixOutcome::Exhausted { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(listener);
    }

    #[tokio::test(start_paused = true)]
    async fn fixer_stops_at_attempt_cap() {
        let dir = tempdir().unwrap();
        let budget = RetryBudget {
            interval: Duration::from_millis(100),
            max_attempts: 3,
            timeout: Duration::from_secs(10),
        };

        let started = Instant::now();
        let outcome = SocketPermissionFixer::new(dir.path().join("missing.sock"))
            .with_budget(budget)
            .run(CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            FixOutcome::Exhausted {
                attempts: 3,
                reason: Exhaustion::Attempts
            }
        );
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn fixer_stops_at_timeout() {
        let dir = tempdir().unwrap();
        let budget = RetryBudget {
            interval: Duration::from_millis(100),
            max_attempts: 100,
            timeout: Duration::from_millis(350),
        };

        let started = Instant::now();
        let outcome = SocketPermissionFixer::new(dir.path().join("missing.sock"))
            .with_budget(budget)
            .run(CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            FixOutcome::Exhausted {
                attempts: 3,
                reason: Exhaustion::Timeout
            }
        );
        assert_eq!(started.elapsed(), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn fixer_honours_parent_cancellation() {
        let dir = tempdir().unwrap();
        let parent = CancellationToken::new();

        let handle = SocketPermissionFixer::new(dir.path().join("missing.sock")).spawn(&parent);

        tokio::time::sleep(Duration::from_millis(150)).await;
        parent.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, FixOutcome::Canceled { attempts: 1 });
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt_makes_no_attempt() {
        let parent = CancellationToken::new();
        parent.cancel();

        let outcome = SocketPermissionFixer::new("/nonexistent/never.sock")
            .spawn(&parent)
            .await
            .unwrap();

        assert_eq!(outcome, FixOutcome::Canceled { attempts: 0 });
    }

    #[test]
    fn relax_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = relax_socket_permissions(&dir.path().join("nope.sock")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn default_budget() {
        let budget = RetryBudget::default();
        assert_eq!(budget.interval, Duration::from_millis(100));
        assert_eq!(budget.max_attempts, 5);
        assert_eq!(budget.timeout, Duration::from_millis(500));
    }
}
