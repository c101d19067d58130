//! Accept loop.
//!
//! Hands each accepted [`Connection`] to a handler task until shutdown is
//! decided. The product router plugs in as the handler.

use std::future::Future;
use std::io;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crud_lifecycle::{Connection, Listener, ShutdownSignal};

/// Pause after a transient accept failure before accepting again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Accept errors that leave the listener usable.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(err)
}

/// Out of file descriptors: closing connections will free some.
#[cfg(unix)]
fn is_fd_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EMFILE || code == libc::ENFILE)
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_err: &io::Error) -> bool {
    false
}

/// Runs the accept loop until `shutdown` completes.
///
/// Returns `Ok(())` on shutdown and `Err` on an accept error the listener
/// cannot recover from.
pub async fn serve<F, Fut>(listener: Listener, handler: F, shutdown: ShutdownSignal) -> io::Result<()>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => info!(address = %addr, "Server accepting connections"),
        Err(e) => warn!(error = %e, "Server accepting connections on unknown address"),
    }

    let accept_loop = async {
        loop {
            match listener.accept().await {
                Ok(connection) => {
                    tokio::spawn(handler(connection));
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Failed to accept connection, retrying");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(e) => {
                    error!(error = %e, "Listener failed");
                    return Err(e);
                }
            }
        }
    };

    tokio::select! {
        result = accept_loop => result,
        _ = shutdown.wait() => {
            debug!("Accept loop stopped by shutdown");
            Ok(())
        }
    }
}

/// Default handler: no router is mounted, so the connection is closed.
pub async fn close_connection(connection: Connection) {
    debug!("No application router mounted, closing connection");
    drop(connection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crud_lifecycle::{ListenerAddr, ListenerKind, SignalCoordinator, create_listener};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
        #[cfg(unix)]
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let ctx = CancellationToken::new();
        let coordinator = SignalCoordinator::new(|| {}).unwrap();
        let listener = create_listener(&ctx, ListenerKind::Tcp, "", "127.0.0.1:0")
            .await
            .unwrap();
        let ListenerAddr::Tcp(addr) = listener.local_addr().unwrap() else {
            panic!("expected tcp address");
        };

        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        let server = tokio::spawn(serve(
            listener,
            move |mut conn: Connection| {
                let counter = counter.clone();
                async move {
                    let mut buf = [0u8; 4];
                    if conn.read_exact(&mut buf).await.is_ok() {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let _ = conn.write_all(&buf).await;
                    }
                }
            },
            coordinator.shutdown_signal(),
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"echo").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo");

        coordinator.request_stop(None);
        let result = tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_handler_closes_connection() {
        let ctx = CancellationToken::new();
        let coordinator = SignalCoordinator::new(|| {}).unwrap();
        let listener = create_listener(&ctx, ListenerKind::Tcp, "", "127.0.0.1:0")
            .await
            .unwrap();
        let ListenerAddr::Tcp(addr) = listener.local_addr().unwrap() else {
            panic!("expected tcp address");
        };

        let server = tokio::spawn(serve(
            listener,
            close_connection,
            coordinator.shutdown_signal(),
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        // Either a clean EOF or a reset, but never any bytes.
        let _ = tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut buf))
            .await
            .unwrap();
        assert!(buf.is_empty());

        coordinator.request_stop(None);
        server.await.unwrap().unwrap();
    }
}
