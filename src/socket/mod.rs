//! Unix domain socket IPC between the hub and external providers.
//!
//! The hub owns a listening socket; each external provider child connects
//! to it once at startup and keeps the connection for its lifetime.
//!
//! # Architecture
//!
//! ```text
//! Hub Process                               Provider Child
//! ┌───────────────────┐                    ┌───────────────────┐
//! │ SocketHub         │                    │ ProviderRuntime   │
//! │  UnixListener     │◄──────────────────►│  UnixStream       │
//! │  ProviderConn     │  newline-delimited │  register +       │
//! │  per connection   │  JSON frames       │  tool_call serve  │
//! └────────┬──────────┘                    └───────────────────┘
//!          │ SocketEvent
//!          ▼
//!   ProviderManager event loop
//! ```
//!
//! The hub itself is not provider-aware: it emits [`SocketEvent`]s
//! (connected / frame / closed) into a channel the provider manager
//! consumes, and the manager binds connections to provider identities when
//! the first `register` frame arrives.
//!
//! # Wire protocol
//!
//! One JSON object per line; see [`crate::protocol`] for message shapes and
//! [`framing`] for the codec and size ceiling.

pub mod conn;
pub mod framing;
pub mod hub;

pub use conn::{CloseReason, FrameSender, ProviderConn};
pub use hub::{SocketEvent, SocketHub};
