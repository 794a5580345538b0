//! Per-connection state for provider sockets (hub side).
//!
//! Each accepted connection gets a [`ProviderConn`] that owns the read and
//! write tasks bridging between the Unix socket and the hub event channel.
//! Writes to one connection are serialized through a bounded queue so frame
//! boundaries stay intact; writes to different connections are independent.

use std::fmt;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedSender};
use tokio::task::JoinHandle;

use crate::constants::OUTBOUND_QUEUE_DEPTH;
use crate::protocol::WireMessage;

use super::framing::{encode, FrameDecoder};
use super::hub::SocketEvent;

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream (EOF).
    Eof,
    /// A frame failed to decode (malformed or oversized).
    DecodeError(String),
    /// Socket read failed.
    ReadError(String),
    /// The connection sent traffic before registering as a provider.
    UnregisteredTraffic,
    /// Closed by the hub (shutdown or provider stop).
    HubClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "peer disconnected"),
            Self::DecodeError(e) => write!(f, "frame decode error: {e}"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::UnregisteredTraffic => write!(f, "traffic before registration"),
            Self::HubClosed => write!(f, "closed by hub"),
        }
    }
}

/// Cloneable handle for queueing frames to one connection.
#[derive(Debug, Clone)]
pub struct FrameSender {
    conn_id: String,
    tx: Sender<Vec<u8>>,
}

impl FrameSender {
    /// Queue a frame for the write task.
    ///
    /// Returns `false` if the connection is gone or its outbound queue is
    /// full (a full queue means the child stopped reading).
    pub fn send(&self, msg: &WireMessage) -> bool {
        match self.tx.try_send(encode(msg)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!(
                    "[Socket] Outbound queue full for {}, dropping frame",
                    self.conn_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Connection this sender belongs to.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }
}

/// Hub-side state for a single provider connection.
///
/// Owns the read/write tasks. Dropping the struct does not abort them;
/// call [`ProviderConn::disconnect`] to tear the connection down.
pub struct ProviderConn {
    conn_id: String,
    frame_tx: Sender<Vec<u8>>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl fmt::Debug for ProviderConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConn")
            .field("conn_id", &self.conn_id)
            .finish_non_exhaustive()
    }
}

impl ProviderConn {
    /// Create a connection handler for an accepted socket.
    ///
    /// Spawns two tasks:
    /// - read: decodes frames and forwards them as [`SocketEvent::Frame`];
    ///   emits [`SocketEvent::Closed`] exactly once when the stream ends.
    /// - write: drains the bounded outbound queue into the socket.
    pub(crate) fn new(
        conn_id: String,
        stream: UnixStream,
        event_tx: UnboundedSender<SocketEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);

        let read_handle = tokio::spawn(Self::read_loop(conn_id.clone(), read_half, event_tx));
        let write_handle = tokio::spawn(Self::write_loop(conn_id.clone(), write_half, frame_rx));

        Self {
            conn_id,
            frame_tx,
            read_handle,
            write_handle,
        }
    }

    /// Queue a frame to this connection.
    pub fn send(&self, msg: &WireMessage) -> bool {
        FrameSender {
            conn_id: self.conn_id.clone(),
            tx: self.frame_tx.clone(),
        }
        .send(msg)
    }

    /// Cloneable sender for use by the call dispatch path.
    pub fn sender(&self) -> FrameSender {
        FrameSender {
            conn_id: self.conn_id.clone(),
            tx: self.frame_tx.clone(),
        }
    }

    /// Connection identifier.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Tear down the connection, aborting both tasks.
    ///
    /// No further events are emitted for this connection.
    pub fn disconnect(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }

    /// Read loop — decodes frames and forwards them to the event channel.
    async fn read_loop(
        conn_id: String,
        mut reader: tokio::net::unix::OwnedReadHalf,
        event_tx: UnboundedSender<SocketEvent>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 64 * 1024];

        let reason = loop {
            match reader.read(&mut buf).await {
                Ok(0) => break CloseReason::Eof,
                Ok(n) => match decoder.feed(&buf[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            let sent = event_tx.send(SocketEvent::Frame {
                                conn_id: conn_id.clone(),
                                frame,
                            });
                            if sent.is_err() {
                                return; // Manager gone, nothing to report to
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("[Socket] Frame decode error on {conn_id}: {e}");
                        break CloseReason::DecodeError(e.to_string());
                    }
                },
                Err(e) => {
                    log::error!("[Socket] Read error on {conn_id}: {e}");
                    break CloseReason::ReadError(e.to_string());
                }
            }
        };

        let _ = event_tx.send(SocketEvent::Closed { conn_id, reason });
    }

    /// Write loop — drains encoded frames into the socket.
    async fn write_loop(
        conn_id: String,
        mut writer: tokio::net::unix::OwnedWriteHalf,
        mut frame_rx: Receiver<Vec<u8>>,
    ) {
        while let Some(data) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                log::error!("[Socket] Write error on {conn_id}: {e}");
                break;
            }
        }
        // Peer sees EOF on its read side once the write half drops.
        let _ = writer.shutdown().await;
    }
}
