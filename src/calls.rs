//! In-flight tool call correlation.
//!
//! `call_tool` for an external provider is asynchronous on the wire: the
//! hub writes a `tool_call` frame and the matching `tool_response` arrives
//! on the socket whenever the child finishes. The [`CallTracker`] turns
//! that into a synchronous await: every dispatched call gets a unique id
//! and a oneshot completion; the socket dispatch path resolves completions
//! by id, and a sweeper task expires calls whose deadline passed.
//!
//! A completion fires exactly once per call id: the pending record is
//! removed under the lock before the oneshot is resolved, so a late
//! `tool_response` after a timeout finds nothing and is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::constants::CALL_SWEEP_INTERVAL;

/// Why a tool call failed. The `kind` string is what the MCP layer
/// surfaces to clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// No entry in the registry for the requested name.
    #[error("no tool named '{0}' is registered")]
    ToolNotFound(String),

    /// The owning provider exists but is not `Running`.
    #[error("provider '{0}' is not running")]
    ProviderUnavailable(String),

    /// The call landed during an atomic tool swap.
    #[error("provider '{0}' is reloading")]
    ProviderReloading(String),

    /// The provider connection dropped before a response arrived.
    #[error("provider '{0}' disconnected")]
    ProviderDisconnected(String),

    /// The call deadline expired.
    #[error("tool call timed out")]
    Timeout,

    /// The child answered with something the hub could not accept.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The provider handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// The host is shutting down.
    #[error("host is shutting down")]
    HostShutdown,
}

impl CallError {
    /// Stable machine-readable kind, e.g. `"ToolNotFound"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) => "ToolNotFound",
            Self::ProviderUnavailable(_) => "ProviderUnavailable",
            Self::ProviderReloading(_) => "ProviderReloading",
            Self::ProviderDisconnected(_) => "ProviderDisconnected",
            Self::Timeout => "Timeout",
            Self::Protocol(_) => "ProtocolError",
            Self::Handler(_) => "HandlerError",
            Self::HostShutdown => "HostShutdown",
        }
    }
}

/// Outcome delivered to the waiting caller.
pub type CallOutcome = Result<Value, CallError>;

struct Pending {
    provider: String,
    tool: String,
    deadline: Instant,
    tx: oneshot::Sender<CallOutcome>,
}

/// Correlates in-flight calls with responses and enforces deadlines.
pub struct CallTracker {
    pending: Mutex<HashMap<String, Pending>>,
    next_seq: AtomicU64,
    /// Wakes the sweeper when a nearer deadline is inserted.
    sweep_notify: Notify,
}

impl CallTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            sweep_notify: Notify::new(),
        }
    }

    /// Register a pending call.
    ///
    /// Returns the allocated call id and the completion the caller awaits.
    /// The id carries a random suffix so ids are never guessable or reused
    /// within a host lifetime.
    pub fn begin(
        &self,
        provider: &str,
        tool: &str,
        deadline: Instant,
    ) -> (String, oneshot::Receiver<CallOutcome>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let rand: u64 = rand::random();
        let call_id = format!("call_{seq:x}{rand:016x}");

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("call tracker lock poisoned");
            pending.insert(
                call_id.clone(),
                Pending {
                    provider: provider.to_string(),
                    tool: tool.to_string(),
                    deadline,
                    tx,
                },
            );
        }
        // A nearer deadline may have arrived; let the sweeper re-plan.
        // notify_one stores a permit, so a notification sent while the
        // sweeper is mid-scan is not lost.
        self.sweep_notify.notify_one();

        (call_id, rx)
    }

    /// Resolve a pending call.
    ///
    /// Returns `false` if `call_id` is unknown, typically a response that
    /// arrived after the call already timed out. Stale completions are the
    /// caller's cue to log at debug, not error.
    pub fn complete(&self, call_id: &str, outcome: CallOutcome) -> bool {
        let record = self
            .pending
            .lock()
            .expect("call tracker lock poisoned")
            .remove(call_id);
        match record {
            Some(pending) => {
                // Receiver may have been dropped (caller cancelled); the
                // call still counts as completed exactly once.
                let _ = pending.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every pending call owned by `provider`.
    ///
    /// Returns the number of calls failed.
    pub fn abort_provider(&self, provider: &str, error: CallError) -> usize {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("call tracker lock poisoned");
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.provider == provider)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        let count = drained.len();
        for record in drained {
            log::debug!(
                "[Calls] Aborting call for {}/{}: {error}",
                record.provider,
                record.tool
            );
            let _ = record.tx.send(Err(error.clone()));
        }
        count
    }

    /// Fail every pending call (host shutdown).
    pub fn fail_all(&self, error: CallError) -> usize {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("call tracker lock poisoned");
            pending.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for record in drained {
            let _ = record.tx.send(Err(error.clone()));
        }
        count
    }

    /// Number of calls currently pending.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("call tracker lock poisoned").len()
    }

    /// Expire every call whose deadline is at or before `now`.
    fn expire_due(&self, now: Instant) -> usize {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("call tracker lock poisoned");
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        let count = drained.len();
        for record in drained {
            log::warn!(
                "[Calls] Call to {}/{} timed out",
                record.provider,
                record.tool
            );
            let _ = record.tx.send(Err(CallError::Timeout));
        }
        count
    }

    /// Earliest pending deadline, if any.
    fn nearest_deadline(&self) -> Option<Instant> {
        self.pending
            .lock()
            .expect("call tracker lock poisoned")
            .values()
            .map(|p| p.deadline)
            .min()
    }

    /// Spawn the deadline sweeper.
    ///
    /// Wakes once per [`CALL_SWEEP_INTERVAL`] — or earlier when a nearer
    /// deadline exists — and expires due calls with [`CallError::Timeout`].
    /// Abort the returned handle on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = Instant::now();
                let sleep_for = match tracker.nearest_deadline() {
                    Some(deadline) if deadline <= now => {
                        tracker.expire_due(now);
                        continue;
                    }
                    Some(deadline) => CALL_SWEEP_INTERVAL.min(deadline - now),
                    None => CALL_SWEEP_INTERVAL,
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {
                        tracker.expire_due(Instant::now());
                    }
                    _ = tracker.sweep_notify.notified() => {
                        // New call registered; recompute the nearest deadline.
                    }
                }
            }
        })
    }
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTracker")
            .field("pending", &self.pending_count())
            .finish()
    }
}
