//! Host-facing event stream.
//!
//! All observable state changes — tool registrations, provider lifecycle —
//! are published on a single `tokio::sync::broadcast` channel. The MCP
//! request layer subscribes to forward `tools/list_changed` notifications;
//! tests subscribe to assert ordering guarantees.
//!
//! Events are emitted only after the corresponding registry or manager
//! state change has committed, so a subscriber that reads the registry on
//! receipt sees a state consistent with the event.

use tokio::sync::broadcast;

/// Capacity of the host event channel.
///
/// Slow subscribers that fall further behind than this see
/// `RecvError::Lagged` and should re-sync from `list_tools()`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An observable host state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A tool became available in the registry.
    ToolRegistered {
        /// Tool name.
        tool: String,
        /// Owning provider.
        provider: String,
    },

    /// A tool was removed from the registry.
    ToolUnregistered {
        /// Tool name.
        tool: String,
        /// Provider that owned it.
        provider: String,
    },

    /// An external provider registered and entered `Running`.
    ProviderConnected {
        /// Provider name.
        provider: String,
    },

    /// A provider's connection ended (crash, EOF, or stop).
    ProviderDisconnected {
        /// Provider name.
        provider: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A provider failed terminally and entered `Stopped`.
    ProviderFailed {
        /// Provider name.
        provider: String,
        /// What went wrong.
        error: String,
    },
}

/// Create the host event channel.
pub fn channel() -> broadcast::Sender<HostEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
