//! Listener acquisition for TCP and Unix domain sockets.
//!
//! [`create_listener`] is the single entry point. For Unix sockets it clears
//! a stale file at the path, binds, makes one immediate attempt at widening
//! the socket's permissions, and leaves the rest to a detached
//! [`SocketPermissionFixer`]. The listener is returned without waiting for
//! the fixer.
//!
//! Two concurrent `create_listener` calls for the same Unix path are not
//! supported; nothing locks the path.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{LifecycleError, LifecycleResult};
#[cfg(unix)]
use crate::permissions::{SocketPermissionFixer, relax_socket_permissions};

/// Transport a listener binds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerKind {
    /// TCP over IPv4.
    #[default]
    Tcp,
    /// Unix domain socket.
    #[serde(alias = "uds")]
    Unix,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Unix => f.write_str("unix"),
        }
    }
}

impl FromStr for ListenerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "unix" | "uds" => Ok(Self::Unix),
            other => Err(format!(
                "unknown listener kind '{other}' (expected 'tcp' or 'unix')"
            )),
        }
    }
}

/// Normalizes a TCP bind address.
///
/// A bare port (`"8181"`) gets a `:` prefix, and an empty host (`":8181"`)
/// becomes the IPv4 wildcard, so both forms bind `0.0.0.0:8181`.
pub fn normalize_tcp_address(address: &str) -> String {
    let address = address.trim();
    let address = if address.contains(':') {
        address.to_string()
    } else {
        format!(":{address}")
    };

    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => address,
    }
}

/// Binds a listener of the requested kind.
///
/// `unix_path` is only read for [`ListenerKind::Unix`] and `tcp_address`
/// only for [`ListenerKind::Tcp`]. For Unix sockets the permission fixer is
/// parented to `ctx`, so cancelling `ctx` stops it.
pub async fn create_listener(
    ctx: &CancellationToken,
    kind: ListenerKind,
    unix_path: impl AsRef<Path>,
    tcp_address: &str,
) -> LifecycleResult<Listener> {
    match kind {
        ListenerKind::Tcp => bind_tcp(tcp_address).await,
        ListenerKind::Unix => bind_unix(ctx, unix_path.as_ref()),
    }
}

async fn bind_tcp(address: &str) -> LifecycleResult<Listener> {
    let address = normalize_tcp_address(address);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| LifecycleError::bind(ListenerKind::Tcp, address.clone(), e))?;

    info!(address = %address, "TCP listener bound");
    Ok(Listener::Tcp(listener))
}

#[cfg(unix)]
fn bind_unix(ctx: &CancellationToken, path: &Path) -> LifecycleResult<Listener> {
    remove_stale_socket(path)?;

    let listener = UnixListener::bind(path).map_err(|e| {
        LifecycleError::bind(ListenerKind::Unix, path.display().to_string(), e)
    })?;
    info!(path = %path.display(), "Unix socket listener bound");

    // Covers the common case where the file is already there; the fixer
    // handles the rest.
    if let Err(e) = relax_socket_permissions(path) {
        debug!(path = %path.display(), error = %e, "Immediate permission relax failed");
    }
    drop(SocketPermissionFixer::new(path).spawn(ctx));

    Ok(Listener::Unix(listener))
}

#[cfg(not(unix))]
fn bind_unix(_ctx: &CancellationToken, _path: &Path) -> LifecycleResult<Listener> {
    Err(LifecycleError::UnsupportedListener {
        kind: ListenerKind::Unix,
    })
}

/// Removes whatever occupies `path`. A missing file is fine.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> LifecycleResult<()> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => {
            info!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path).map_err(|e| LifecycleError::stale_socket(path, e))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LifecycleError::stale_socket(path, e)),
    }
}

/// Address a [`Listener`] is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerAddr {
    Tcp(SocketAddr),
    /// `None` for unnamed sockets.
    Unix(Option<PathBuf>),
}

impl fmt::Display for ListenerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Self::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}

/// A bound stream listener. Owned by the server's accept loop once returned.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Returns the transport of this listener.
    pub fn kind(&self) -> ListenerKind {
        match self {
            Self::Tcp(_) => ListenerKind::Tcp,
            #[cfg(unix)]
            Self::Unix(_) => ListenerKind::Unix,
        }
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<ListenerAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().map(ListenerAddr::Tcp),
            #[cfg(unix)]
            Self::Unix(listener) => {
                let addr = listener.local_addr()?;
                Ok(ListenerAddr::Unix(addr.as_pathname().map(Path::to_path_buf)))
            }
        }
    }

    /// Accepts one connection.
    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(peer = %peer, "Accepted TCP connection");
                Ok(Connection::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                debug!("Accepted unix socket connection");
                Ok(Connection::Unix(stream))
            }
        }
    }
}

/// A connection accepted from a [`Listener`].
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
