//! Application-wide constants for toolhub.
//!
//! This module centralizes default timeouts and limits so they are
//! discoverable in one place. Each constant documents why its value was
//! chosen. All of them can be overridden through the `performance`
//! section of the configuration (see [`crate::config`]).

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Default deadline for a single tool call, from dispatch to response.
///
/// Tool handlers routinely shell out or hit the network, so this is
/// generous. Hosts that run interactive clients usually lower it via
/// `performance.tool_call_timeout`.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a freshly spawned provider child has to send its `register`
/// frame before the manager declares the start failed.
///
/// Covers interpreter startup plus module loading; slow runtimes (first
/// `npx` run, cold Python imports) fit comfortably inside 15 seconds.
pub const PROVIDER_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Grace period between SIGTERM and SIGKILL when stopping a provider child.
pub const PROVIDER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Limits
// ============================================================================

/// Maximum size of a single frame on the provider socket (4 MiB).
///
/// A frame is one newline-delimited JSON message. Tool results larger than
/// this should be chunked by the provider; an unbounded buffer would let a
/// runaway child exhaust host memory.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Depth of the per-connection outbound frame queue.
///
/// Writes to one connection are serialized through this queue to keep frame
/// boundaries intact. 256 in-flight frames is far beyond what a single
/// provider sees in practice; hitting the cap means the child stopped
/// reading.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

// ============================================================================
// Intervals
// ============================================================================

/// Upper bound on how long the call-tracker sweeper sleeps between expiry
/// scans. It wakes earlier whenever a nearer deadline exists.
pub const CALL_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Coalescing window for file-watcher events before a reload is classified.
///
/// Editors produce bursts (write + rename + chmod); collecting for 200ms
/// turns a burst into a single restart.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);
