//! A signal and an explicit stop racing each other. Separate test binary so
//! the raised signal cannot reach coordinators in other tests.

#![cfg(unix)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crud_lifecycle::{ShutdownOutcome, SignalCoordinator};

#[derive(Debug, thiserror::Error)]
#[error("database unreachable")]
struct DatabaseDown;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn signal_and_request_stop_decide_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let coordinator = SignalCoordinator::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    let handle = coordinator.stop_handle();

    let stopper = tokio::spawn(async move { handle.stop_with_error(DatabaseDown) });
    let rc = unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
    assert_eq!(rc, 0);
    let explicit_won = stopper.await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.outcome())
        .await
        .expect("shutdown should be decided");

    match &outcome {
        ShutdownOutcome::Signal(_) => assert!(!explicit_won),
        ShutdownOutcome::Requested(Some(err)) => {
            assert!(explicit_won);
            assert_eq!(err.to_string(), "database unreachable");
        }
        ShutdownOutcome::Requested(None) => panic!("no caller requested a clean stop"),
    }

    // Let the signal, if it lost, reach the listener task before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let waited = coordinator.wait().await;
    assert_eq!(waited.is_err(), outcome.error().is_some());
}
