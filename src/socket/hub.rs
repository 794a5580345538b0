//! Unix domain socket server for accepting provider connections.
//!
//! Listens on a Unix socket and creates a [`ProviderConn`] for each
//! accepted connection. Connections are announced to the provider manager
//! via [`SocketEvent::Connected`]; the hub never interprets frames itself.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::protocol::WireMessage;

use super::conn::{CloseReason, ProviderConn};

/// `sun_path` is 104 bytes on macOS and 108 on Linux; use the conservative
/// limit so the same configuration works on both.
const MAX_SOCKET_PATH: usize = 104;

/// Event emitted by the socket hub into the manager's channel.
#[derive(Debug)]
pub enum SocketEvent {
    /// A new connection was accepted. The receiver takes ownership of the
    /// [`ProviderConn`] and is responsible for tearing it down.
    Connected {
        /// Identifier assigned to the connection.
        conn_id: String,
        /// Connection handle (read/write tasks already running).
        conn: ProviderConn,
    },

    /// A decoded frame arrived on a connection.
    Frame {
        /// Source connection.
        conn_id: String,
        /// The decoded message.
        frame: WireMessage,
    },

    /// A connection ended. Emitted at most once per connection, and never
    /// after [`ProviderConn::disconnect`] was used to tear it down.
    Closed {
        /// The connection that ended.
        conn_id: String,
        /// Why it ended.
        reason: CloseReason,
    },
}

/// Unix domain socket server owned by the provider manager.
///
/// Binds a `UnixListener` and runs an accept loop that wraps each
/// connection in a [`ProviderConn`].
#[derive(Debug)]
pub struct SocketHub {
    socket_path: PathBuf,
    accept_handle: JoinHandle<()>,
}

impl SocketHub {
    /// Start the socket hub at the given path.
    ///
    /// Removes any stale socket file, binds the listener, sets permissions
    /// to 0600, and spawns the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exceeds the OS socket path limit or
    /// the socket cannot be bound. Bind failure is the one fatal startup
    /// condition for the host.
    pub fn start(
        socket_path: PathBuf,
        event_tx: UnboundedSender<SocketEvent>,
    ) -> Result<Self> {
        let path_len = socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "Socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                socket_path.display()
            );
        }

        // Remove stale socket file if it exists
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket: {}", socket_path.display())
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;

        // Socket is private to this user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, perms)?;
        }

        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        log::info!("[Socket] Listening on {}", socket_path.display());

        let path_clone = socket_path.clone();
        let accept_handle = tokio::spawn(Self::accept_loop(listener, event_tx, path_clone));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    /// Accept loop — runs as a tokio task.
    async fn accept_loop(
        listener: UnixListener,
        event_tx: UnboundedSender<SocketEvent>,
        socket_path: PathBuf,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let conn_id = generate_conn_id();
                    log::info!("[Socket] Connection accepted: {conn_id}");

                    let conn = ProviderConn::new(conn_id.clone(), stream, event_tx.clone());

                    if event_tx
                        .send(SocketEvent::Connected { conn_id, conn })
                        .is_err()
                    {
                        log::warn!("[Socket] Event channel closed, stopping accept loop");
                        break;
                    }
                }
                Err(e) => {
                    // Socket file removed means the hub is shutting down
                    if !socket_path.exists() {
                        log::info!("[Socket] Socket file removed, stopping accept loop");
                        break;
                    }
                    log::error!("[Socket] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Stop the hub and unlink the socket file.
    pub fn shutdown(self) {
        self.accept_handle.abort();
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        log::info!("[Socket] Shut down, removed {}", self.socket_path.display());
    }

    /// Path to the socket file.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Generate a unique connection ID using a monotonic counter + random suffix.
fn generate_conn_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("conn:{seq:x}{rand:04x}")
}
