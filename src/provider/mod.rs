//! Provider manager — the central orchestrator.
//!
//! Coordinates built-in and external providers against one shared
//! [`ToolRegistry`]. The manager owns the socket hub, the call tracker,
//! and the process supervisor, and runs the event loop that consumes hub
//! and supervisor events; the hub never calls back into the manager.
//!
//! # Provider state machine
//!
//! ```text
//!                    start()
//!   Idle ────────────────────► Starting
//!     ▲                           │ register arrives
//!     │ final stop                ▼
//!   Stopped ◄── exit / stop ── Running
//!     ▲                           │ reload requested
//!     │                           ▼
//!     └── terminal failure ── Reloading ──► Starting (new proc)
//! ```
//!
//! Tools are only present in the registry while their provider is
//! `Running`; during a reload the provider's set is cleared atomically and
//! reinstalled atomically when the new child registers, so observers see
//! the old complete set, nothing, or the new complete set — never a
//! partial swap.

pub mod builtin;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::calls::{CallError, CallTracker};
use crate::config::{Config, PerformanceConfig, ProviderEntry};
use crate::events::HostEvent;
use crate::protocol::{RegisterPayload, ToolCallPayload, WireMessage};
use crate::registry::{RegisteredTool, ToolRegistry};
use crate::socket::{CloseReason, FrameSender, ProviderConn, SocketEvent, SocketHub};
use crate::supervisor::{ProcessSupervisor, ProviderExit, SpawnSpec};

use builtin::{BuiltinHost, BuiltinProvider};

/// Lifecycle state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// No child, no registered tools.
    Idle,
    /// Child spawned, awaiting its `register` frame.
    Starting,
    /// Tools present; calls proceed.
    Running,
    /// Tools cleared; old child stopping, new child being spawned.
    Reloading,
    /// Terminal; tools cleared.
    Stopped,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Reloading => write!(f, "reloading"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

enum RecordKind {
    Builtin(BuiltinHost),
    External { entry: ProviderEntry },
}

struct ProviderRecord {
    kind: RecordKind,
    status_tx: watch::Sender<ProviderStatus>,
    /// Bound connection, owned while the provider is running.
    conn: Option<ProviderConn>,
    /// Frame sender for the bound connection.
    sender: Option<FrameSender>,
    /// Tool names from the last successful registration. Consulted on
    /// registry misses so calls landing mid-reload report
    /// `ProviderReloading` instead of `ToolNotFound`.
    recent_tools: Vec<String>,
}

impl ProviderRecord {
    fn new(kind: RecordKind, status: ProviderStatus) -> Self {
        Self {
            kind,
            status_tx: watch::channel(status).0,
            conn: None,
            sender: None,
            recent_tools: Vec::new(),
        }
    }

    fn status(&self) -> ProviderStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: ProviderStatus) {
        self.status_tx.send_replace(status);
    }
}

struct Shared {
    registry: Arc<ToolRegistry>,
    tracker: Arc<CallTracker>,
    supervisor: Arc<ProcessSupervisor>,
    providers: RwLock<HashMap<String, Arc<Mutex<ProviderRecord>>>>,
    /// conn_id → provider for bound connections.
    bindings: Mutex<HashMap<String, String>>,
    /// Accepted connections that have not sent `register` yet.
    unbound: Mutex<HashMap<String, ProviderConn>>,
    event_tx: broadcast::Sender<HostEvent>,
    performance: PerformanceConfig,
    socket_path: PathBuf,
    shutting_down: AtomicBool,
}

/// Central coordinator for tool providers.
///
/// Construct with [`ProviderManager::start`], register built-in providers,
/// then [`ProviderManager::start_all`] the external ones.
pub struct ProviderManager {
    shared: Arc<Shared>,
    hub: Mutex<Option<SocketHub>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProviderManager {
    /// Bind the socket hub and start the manager event loop.
    ///
    /// External providers declared in `config` get `Idle` records; call
    /// [`ProviderManager::start_all`] (or `start_provider`) to launch them.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound, the one fatal
    /// startup condition.
    pub fn start(config: Config) -> Result<Self> {
        let socket_path = match &config.socket_path {
            Some(path) => path.clone(),
            None => crate::paths::default_socket_path()?,
        };

        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let hub = SocketHub::start(socket_path.clone(), socket_tx)?;

        let event_tx = crate::events::channel();
        let registry = Arc::new(ToolRegistry::new(event_tx.clone()));
        let tracker = Arc::new(CallTracker::new());
        let supervisor = Arc::new(ProcessSupervisor::new(
            socket_path.clone(),
            config.performance.provider_shutdown_grace(),
            exit_tx,
        ));

        let mut providers = HashMap::new();
        for (name, entry) in &config.providers {
            providers.insert(
                name.clone(),
                Arc::new(Mutex::new(ProviderRecord::new(
                    RecordKind::External {
                        entry: entry.clone(),
                    },
                    ProviderStatus::Idle,
                ))),
            );
        }

        let shared = Arc::new(Shared {
            registry,
            tracker,
            supervisor,
            providers: RwLock::new(providers),
            bindings: Mutex::new(HashMap::new()),
            unbound: Mutex::new(HashMap::new()),
            event_tx,
            performance: config.performance.clone(),
            socket_path,
            shutting_down: AtomicBool::new(false),
        });

        let dispatch = tokio::spawn(dispatch_loop(Arc::clone(&shared), socket_rx, exit_rx));
        let sweeper = shared.tracker.spawn_sweeper();

        Ok(Self {
            shared,
            hub: Mutex::new(Some(hub)),
            tasks: Mutex::new(vec![dispatch, sweeper]),
        })
    }

    /// Path of the bound provider socket.
    pub fn socket_path(&self) -> PathBuf {
        self.shared.socket_path.clone()
    }

    /// Subscribe to the host event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.shared.event_tx.subscribe()
    }

    /// All registered tools in deterministic order by name.
    pub fn list_tools(&self) -> Vec<RegisteredTool> {
        self.shared.registry.list()
    }

    /// Current status of a provider, if it exists.
    pub fn provider_status(&self, name: &str) -> Option<ProviderStatus> {
        let record = self.shared.provider(name)?;
        let status = record.lock().expect("provider lock poisoned").status();
        Some(status)
    }

    /// Register an in-process provider and install its tools.
    ///
    /// # Errors
    ///
    /// Fails on duplicate provider name, a failing `initialize` hook, or a
    /// tool-name collision (in which case nothing is installed).
    pub fn register_builtin(
        &self,
        provider: Arc<dyn BuiltinProvider>,
        config: &Value,
    ) -> Result<()> {
        let name = provider.name().to_string();
        if self.shared.provider(&name).is_some() {
            anyhow::bail!("Provider '{name}' is already registered");
        }

        let (host, specs) = BuiltinHost::prepare(provider, config)
            .map_err(|e| anyhow::anyhow!("Provider '{name}' failed to initialize: {e}"))?;

        {
            let mut providers = self
                .shared
                .providers
                .write()
                .expect("provider map lock poisoned");
            if providers.contains_key(&name) {
                anyhow::bail!("Provider '{name}' is already registered");
            }
            // Record goes in first (already Running) so a registry
            // snapshot never shows tools owned by an absent provider.
            providers.insert(
                name.clone(),
                Arc::new(Mutex::new(ProviderRecord::new(
                    RecordKind::Builtin(host),
                    ProviderStatus::Running,
                ))),
            );
        }

        if let Err(e) = self.shared.registry.replace_provider_tools(&name, specs) {
            self.shared
                .providers
                .write()
                .expect("provider map lock poisoned")
                .remove(&name);
            return Err(e).with_context(|| format!("Provider '{name}' rejected"));
        }

        let _ = self.shared.event_tx.send(HostEvent::ProviderConnected {
            provider: name.clone(),
        });
        log::info!("[Manager] Built-in provider {name} registered");
        Ok(())
    }

    /// Launch one external provider and wait until it registers.
    ///
    /// # Errors
    ///
    /// Fails if the provider is unknown, not startable from its current
    /// state, the spawn fails, or the registration deadline passes. On
    /// failure the provider is `Stopped` and `provider-failed` has been
    /// emitted.
    pub async fn start_provider(&self, name: &str) -> Result<()> {
        let spec = {
            let record = self
                .shared
                .provider(name)
                .with_context(|| format!("Unknown provider '{name}'"))?;
            let record = record.lock().expect("provider lock poisoned");
            let RecordKind::External { entry } = &record.kind else {
                anyhow::bail!("Provider '{name}' is built-in");
            };
            match record.status() {
                ProviderStatus::Idle | ProviderStatus::Stopped => {}
                status => anyhow::bail!("Provider '{name}' cannot start from state '{status}'"),
            }
            record.set_status(ProviderStatus::Starting);
            spawn_spec(entry)
        };

        if let Err(e) = self.shared.supervisor.spawn(name, &spec) {
            self.shared
                .fail_provider(name, format!("spawn failed: {e}"));
            return Err(e);
        }

        self.shared
            .await_running(name, self.shared.performance.provider_registration_timeout())
            .await
    }

    /// Launch every configured external provider.
    ///
    /// A failure in one provider is logged and does not affect the others.
    pub async fn start_all(&self) {
        let names: Vec<String> = {
            let providers = self
                .shared
                .providers
                .read()
                .expect("provider map lock poisoned");
            providers
                .iter()
                .filter(|(_, record)| {
                    matches!(
                        record.lock().expect("provider lock poisoned").kind,
                        RecordKind::External { .. }
                    )
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in names {
            if let Err(e) = self.start_provider(&name).await {
                log::error!("[Manager] Failed to start provider {name}: {e:#}");
            }
        }
    }

    /// Route a tool call to its provider.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, CallError> {
        let shared = &self.shared;
        if shared.shutting_down.load(Ordering::SeqCst) {
            return Err(CallError::HostShutdown);
        }

        let Some(tool) = shared.registry.get(name) else {
            // During a reload the provider's set is cleared; a call for a
            // tool that was present before the swap fails fast with the
            // reload error rather than pretending the tool never existed.
            if let Some(provider) = shared.reloading_owner(name) {
                return Err(CallError::ProviderReloading(provider));
            }
            return Err(CallError::ToolNotFound(name.to_string()));
        };
        let provider = tool.provider;

        let record = shared
            .provider(&provider)
            .ok_or_else(|| CallError::ProviderUnavailable(provider.clone()))?;

        enum Route {
            Builtin(builtin::BuiltinHandler, builtin::BuiltinContext),
            External(FrameSender),
        }

        let route = {
            let record = record.lock().expect("provider lock poisoned");
            match &record.kind {
                RecordKind::Builtin(host) => match host.handlers.get(name) {
                    Some(handler) => Route::Builtin(Arc::clone(handler), host.ctx.clone()),
                    None => return Err(CallError::ToolNotFound(name.to_string())),
                },
                RecordKind::External { .. } => {
                    match record.status() {
                        ProviderStatus::Running => {}
                        ProviderStatus::Reloading => {
                            return Err(CallError::ProviderReloading(provider))
                        }
                        _ => return Err(CallError::ProviderUnavailable(provider)),
                    }
                    match &record.sender {
                        Some(sender) => Route::External(sender.clone()),
                        None => return Err(CallError::ProviderUnavailable(provider)),
                    }
                }
            }
        };

        match route {
            Route::Builtin(handler, ctx) => {
                let result =
                    tokio::task::spawn_blocking(move || handler(&args, &ctx)).await;
                match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(reason)) => Err(CallError::Handler(reason)),
                    Err(e) => Err(CallError::Handler(format!("handler panicked: {e}"))),
                }
            }
            Route::External(sender) => {
                let deadline = Instant::now() + shared.performance.tool_call_timeout();
                let (call_id, rx) = shared.tracker.begin(&provider, name, deadline);

                let frame = WireMessage::ToolCall {
                    id: call_id.clone(),
                    data: ToolCallPayload {
                        tool_name: name.to_string(),
                        params: args,
                    },
                };
                if !sender.send(&frame) {
                    shared.tracker.complete(
                        &call_id,
                        Err(CallError::ProviderDisconnected(provider.clone())),
                    );
                }

                match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CallError::Protocol(
                        "call completion channel closed".to_string(),
                    )),
                }
            }
        }
    }

    /// Stop a provider for good (terminal `Stopped`).
    pub async fn stop_provider(&self, name: &str) {
        let torn_down = self.shared.tear_down(
            name,
            CallError::ProviderDisconnected(name.to_string()),
            Some(HostEvent::ProviderDisconnected {
                provider: name.to_string(),
                reason: "stopped".to_string(),
            }),
        );
        if torn_down {
            self.shared.supervisor.stop(name).await;
        }
    }

    /// Replace the stored configuration entry for an external provider.
    ///
    /// Takes effect on the next restart or reinitialize.
    pub fn update_provider_entry(&self, name: &str, entry: ProviderEntry) -> Result<()> {
        let record = self
            .shared
            .provider(name)
            .with_context(|| format!("Unknown provider '{name}'"))?;
        let mut record = record.lock().expect("provider lock poisoned");
        match &mut record.kind {
            RecordKind::External { entry: stored } => {
                *stored = entry;
                Ok(())
            }
            RecordKind::Builtin(_) => anyhow::bail!("Provider '{name}' is built-in"),
        }
    }

    /// Restart an external provider: discard the child and all state, then
    /// spawn a fresh one with the current configuration entry.
    ///
    /// Concurrent calls for this provider fail fast with
    /// `ProviderReloading` until the new child registers.
    pub async fn reload_provider(&self, name: &str) -> Result<()> {
        let shared = &self.shared;

        // 1+2: capture config snapshot, enter Reloading, clear tools
        let spec = {
            let record = shared
                .provider(name)
                .with_context(|| format!("Unknown provider '{name}'"))?;
            let mut record = record.lock().expect("provider lock poisoned");
            let RecordKind::External { entry } = &record.kind else {
                anyhow::bail!("Provider '{name}' is built-in");
            };
            let spec = spawn_spec(entry);
            match record.status() {
                ProviderStatus::Running | ProviderStatus::Starting => {}
                status => anyhow::bail!("Provider '{name}' cannot reload from state '{status}'"),
            }
            record.set_status(ProviderStatus::Reloading);
            let conn = record.conn.take();
            record.sender = None;
            if let Some(conn) = conn {
                shared
                    .bindings
                    .lock()
                    .expect("binding lock poisoned")
                    .remove(conn.conn_id());
                conn.disconnect();
            }
            spec
        };
        shared.registry.clear_provider(name);

        // 3: stop the old child (graceful, then force)
        shared.supervisor.stop(name).await;

        // 4: fail calls that were already in flight
        shared
            .tracker
            .abort_provider(name, CallError::ProviderReloading(name.to_string()));

        // 5: spawn the replacement
        {
            let record = shared
                .provider(name)
                .with_context(|| format!("Provider '{name}' disappeared during reload"))?;
            record
                .lock()
                .expect("provider lock poisoned")
                .set_status(ProviderStatus::Starting);
        }
        if let Err(e) = shared.supervisor.spawn(name, &spec) {
            shared.fail_provider(name, format!("respawn failed: {e}"));
            return Err(e);
        }

        // 6: wait for the new child's registration
        shared
            .await_running(name, shared.performance.provider_registration_timeout())
            .await
    }

    /// Deliver new configuration to a running child without a restart.
    ///
    /// The child applies it through its `initialize(new_config,
    /// previous_state)` hook.
    pub fn reinitialize_provider(&self, name: &str, new_config: Value) -> Result<()> {
        let record = self
            .shared
            .provider(name)
            .with_context(|| format!("Unknown provider '{name}'"))?;
        let mut record = record.lock().expect("provider lock poisoned");

        match &mut record.kind {
            RecordKind::External { entry } => {
                entry.config = new_config.clone();
            }
            RecordKind::Builtin(_) => anyhow::bail!("Provider '{name}' is built-in"),
        }

        if record.status() != ProviderStatus::Running {
            anyhow::bail!("Provider '{name}' is not running");
        }
        let Some(sender) = &record.sender else {
            anyhow::bail!("Provider '{name}' has no bound connection");
        };
        if !sender.send(&WireMessage::Reinitialize { data: new_config }) {
            anyhow::bail!("Provider '{name}' connection is gone");
        }
        Ok(())
    }

    /// Stop everything: fail in-flight calls, stop children, dispose
    /// built-ins, close the socket, unlink the socket file.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[Manager] Shutting down");

        self.shared.tracker.fail_all(CallError::HostShutdown);

        let records: Vec<(String, Arc<Mutex<ProviderRecord>>)> = {
            let providers = self
                .shared
                .providers
                .read()
                .expect("provider map lock poisoned");
            providers
                .iter()
                .map(|(n, r)| (n.clone(), Arc::clone(r)))
                .collect()
        };

        for (name, record) in records {
            let mut record = record.lock().expect("provider lock poisoned");
            record.set_status(ProviderStatus::Stopped);
            if let Some(conn) = record.conn.take() {
                conn.disconnect();
            }
            record.sender = None;
            if let RecordKind::Builtin(host) = &record.kind {
                host.provider.dispose();
            }
            drop(record);
            self.shared.registry.clear_provider(&name);
        }
        self.shared
            .bindings
            .lock()
            .expect("binding lock poisoned")
            .clear();
        for (_, conn) in self
            .shared
            .unbound
            .lock()
            .expect("unbound lock poisoned")
            .drain()
        {
            conn.disconnect();
        }

        self.shared.supervisor.stop_all().await;

        if let Some(hub) = self.hub.lock().expect("hub lock poisoned").take() {
            hub.shutdown();
        }
        for task in self.tasks.lock().expect("task lock poisoned").drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field("socket_path", &self.shared.socket_path)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn provider(&self, name: &str) -> Option<Arc<Mutex<ProviderRecord>>> {
        self.providers
            .read()
            .expect("provider map lock poisoned")
            .get(name)
            .cloned()
    }

    /// Provider currently mid-reload whose last registered set contained
    /// `tool`, if any.
    fn reloading_owner(&self, tool: &str) -> Option<String> {
        let providers = self.providers.read().expect("provider map lock poisoned");
        for (name, record) in providers.iter() {
            let record = record.lock().expect("provider lock poisoned");
            let mid_reload = matches!(
                record.status(),
                ProviderStatus::Reloading | ProviderStatus::Starting
            );
            if mid_reload && record.recent_tools.iter().any(|t| t == tool) {
                return Some(name.clone());
            }
        }
        None
    }

    /// Wait until `name` reaches `Running`, failing it on deadline.
    async fn await_running(
        &self,
        name: &str,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let mut status_rx = {
            let record = self
                .provider(name)
                .with_context(|| format!("Unknown provider '{name}'"))?;
            let record = record.lock().expect("provider lock poisoned");
            record.status_tx.subscribe()
        };

        let deadline = Instant::now() + timeout;
        loop {
            match *status_rx.borrow_and_update() {
                ProviderStatus::Running => return Ok(()),
                ProviderStatus::Stopped => {
                    anyhow::bail!("Provider '{name}' failed during startup")
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                self.fail_provider(name, "registration deadline passed".to_string());
                anyhow::bail!(
                    "Provider '{name}' did not register within {}ms",
                    timeout.as_millis()
                );
            }
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        anyhow::bail!("Provider '{name}' record dropped");
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Transition a provider to `Stopped` and release everything it held.
    ///
    /// Pending calls fail with `abort_error`; `event` is emitted after the
    /// cleanup commits. Returns false when the provider was already
    /// `Stopped` (or unknown), making crash/close/exit handling
    /// idempotent.
    fn tear_down(
        &self,
        name: &str,
        abort_error: CallError,
        event: Option<HostEvent>,
    ) -> bool {
        let Some(record) = self.provider(name) else {
            return false;
        };

        {
            let mut record = record.lock().expect("provider lock poisoned");
            if record.status() == ProviderStatus::Stopped {
                return false;
            }
            record.set_status(ProviderStatus::Stopped);
            if let Some(conn) = record.conn.take() {
                self.bindings
                    .lock()
                    .expect("binding lock poisoned")
                    .remove(conn.conn_id());
                conn.disconnect();
            }
            record.sender = None;
            record.recent_tools.clear();
        }

        self.registry.clear_provider(name);
        self.tracker.abort_provider(name, abort_error);

        if let Some(event) = event {
            let _ = self.event_tx.send(event);
        }
        true
    }

    /// Terminal failure: tear down and emit `provider-failed`.
    fn fail_provider(&self, name: &str, error: String) {
        log::error!("[Manager] Provider {name} failed: {error}");
        let torn_down = self.tear_down(
            name,
            CallError::ProviderDisconnected(name.to_string()),
            Some(HostEvent::ProviderFailed {
                provider: name.to_string(),
                error,
            }),
        );
        if torn_down {
            // The child may still be alive (e.g. registration deadline).
            let supervisor = Arc::clone(&self.supervisor);
            let name = name.to_string();
            tokio::spawn(async move {
                supervisor.stop(&name).await;
            });
        }
    }

    fn handle_socket_event(self: &Arc<Self>, event: SocketEvent) {
        match event {
            SocketEvent::Connected { conn_id, conn } => {
                log::debug!("[Manager] Connection {conn_id} awaiting registration");
                self.unbound
                    .lock()
                    .expect("unbound lock poisoned")
                    .insert(conn_id, conn);
            }
            SocketEvent::Frame { conn_id, frame } => self.handle_frame(conn_id, frame),
            SocketEvent::Closed { conn_id, reason } => self.handle_closed(&conn_id, reason),
        }
    }

    fn handle_frame(self: &Arc<Self>, conn_id: String, frame: WireMessage) {
        let bound = self
            .bindings
            .lock()
            .expect("binding lock poisoned")
            .get(&conn_id)
            .cloned();

        match (bound, frame) {
            (None, WireMessage::Register { data }) => self.handle_register(&conn_id, data),
            (None, other) => {
                // Before binding, only `register` is allowed.
                log::warn!(
                    "[Manager] Closing {conn_id}: {} ({} frame before register)",
                    CloseReason::UnregisteredTraffic,
                    other.kind()
                );
                if let Some(conn) = self
                    .unbound
                    .lock()
                    .expect("unbound lock poisoned")
                    .remove(&conn_id)
                {
                    conn.disconnect();
                }
            }
            (Some(provider), WireMessage::ToolResponse { id, data, error }) => {
                let outcome = match (data, error) {
                    (Some(value), None) => Ok(value),
                    (_, Some(reason)) => Err(CallError::Handler(reason)),
                    (None, None) => Err(CallError::Protocol(
                        "tool_response carried neither data nor error".to_string(),
                    )),
                };
                if !self.tracker.complete(&id, outcome) {
                    log::debug!("[Manager] Discarding stale tool_response {id} from {provider}");
                }
            }
            (Some(provider), WireMessage::Log { data }) => {
                let level = match data.level.as_str() {
                    "error" => log::Level::Error,
                    "warn" => log::Level::Warn,
                    "debug" => log::Level::Debug,
                    _ => log::Level::Info,
                };
                match &data.fields {
                    Some(fields) => {
                        log::log!(level, "[provider:{provider}] {} {fields}", data.message)
                    }
                    None => log::log!(level, "[provider:{provider}] {}", data.message),
                }
            }
            (Some(provider), WireMessage::Register { data }) => {
                // Re-registration from the same provider replaces its set.
                if data.name != provider {
                    log::warn!(
                        "[Manager] Connection for {provider} re-registered as '{}', ignoring",
                        data.name
                    );
                    return;
                }
                let declared: Vec<String> = data.tools.iter().map(|t| t.name.clone()).collect();
                match self.registry.replace_provider_tools(&provider, data.tools) {
                    Ok(()) => {
                        if let Some(record) = self.provider(&provider) {
                            record.lock().expect("provider lock poisoned").recent_tools =
                                declared;
                        }
                        log::info!("[Manager] Provider {provider} updated its tool set");
                    }
                    Err(e) => log::warn!("[Manager] Re-registration for {provider} rejected: {e}"),
                }
            }
            (Some(provider), other) => {
                log::warn!(
                    "[Manager] Provider {provider} sent unexpected {} frame, ignoring",
                    other.kind()
                );
            }
        }
    }

    fn handle_register(self: &Arc<Self>, conn_id: &str, payload: RegisterPayload) {
        let Some(conn) = self
            .unbound
            .lock()
            .expect("unbound lock poisoned")
            .remove(conn_id)
        else {
            log::warn!("[Manager] Register from unknown connection {conn_id}");
            return;
        };

        let name = payload.name.clone();
        let Some(record) = self.provider(&name) else {
            log::warn!("[Manager] Register for unrecognized provider '{name}', closing {conn_id}");
            conn.disconnect();
            return;
        };

        // Validate the record can accept this connection.
        {
            let record = record.lock().expect("provider lock poisoned");
            let acceptable = match &record.kind {
                RecordKind::Builtin(_) => {
                    log::warn!("[Manager] '{name}' is built-in, rejecting socket registration");
                    false
                }
                RecordKind::External { .. } => match record.status() {
                    ProviderStatus::Starting if record.conn.is_none() => true,
                    status => {
                        log::warn!(
                            "[Manager] Provider {name} cannot bind in state '{status}' \
                             (already bound: {})",
                            record.conn.is_some()
                        );
                        false
                    }
                },
            };
            if !acceptable {
                drop(record);
                conn.disconnect();
                return;
            }
        }

        // Install the declared tools atomically.
        let declared: Vec<String> = payload.tools.iter().map(|t| t.name.clone()).collect();
        if let Err(e) = self
            .registry
            .replace_provider_tools(&name, payload.tools)
        {
            conn.disconnect();
            self.fail_provider(&name, e.to_string());
            return;
        }

        // Bind and go Running.
        let initial_config = {
            let mut record = record.lock().expect("provider lock poisoned");
            self.bindings
                .lock()
                .expect("binding lock poisoned")
                .insert(conn_id.to_string(), name.clone());
            record.sender = Some(conn.sender());
            record.conn = Some(conn);
            record.recent_tools = declared;
            record.set_status(ProviderStatus::Running);
            match &record.kind {
                RecordKind::External { entry } => entry.config.clone(),
                RecordKind::Builtin(_) => Value::Null,
            }
        };

        log::info!(
            "[Manager] Provider {name} registered ({} tools, pid {:?})",
            self.registry.provider_tools(&name).len(),
            payload.pid
        );

        // Hand the child its configuration blob through the same path a
        // live reconfigure uses.
        if !initial_config.is_null() {
            let record = record.lock().expect("provider lock poisoned");
            if let Some(sender) = &record.sender {
                sender.send(&WireMessage::Reinitialize {
                    data: initial_config,
                });
            }
        }

        let _ = self.event_tx.send(HostEvent::ProviderConnected { provider: name });
    }

    fn handle_closed(self: &Arc<Self>, conn_id: &str, reason: CloseReason) {
        // Unbound connection: nothing depended on it.
        if self
            .unbound
            .lock()
            .expect("unbound lock poisoned")
            .remove(conn_id)
            .is_some()
        {
            log::debug!("[Manager] Unregistered connection {conn_id} closed: {reason}");
            return;
        }

        let provider = self
            .bindings
            .lock()
            .expect("binding lock poisoned")
            .remove(conn_id);
        let Some(provider) = provider else {
            return;
        };

        log::warn!("[Manager] Provider {provider} connection closed: {reason}");
        let torn_down = self.tear_down(
            &provider,
            CallError::ProviderDisconnected(provider.clone()),
            Some(HostEvent::ProviderDisconnected {
                provider: provider.clone(),
                reason: reason.to_string(),
            }),
        );
        if torn_down {
            // The child process may outlive its connection.
            let supervisor = Arc::clone(&self.supervisor);
            tokio::spawn(async move {
                supervisor.stop(&provider).await;
            });
        }
    }

    fn handle_exit(self: &Arc<Self>, exit: ProviderExit) {
        self.supervisor.forget(&exit.provider);
        if exit.expected {
            return;
        }

        let Some(record) = self.provider(&exit.provider) else {
            return;
        };
        let status = record.lock().expect("provider lock poisoned").status();
        match status {
            ProviderStatus::Starting | ProviderStatus::Reloading => {
                self.fail_provider(
                    &exit.provider,
                    format!("child exited before registering: {}", exit.reason),
                );
            }
            ProviderStatus::Running => {
                self.tear_down(
                    &exit.provider,
                    CallError::ProviderDisconnected(exit.provider.clone()),
                    Some(HostEvent::ProviderDisconnected {
                        provider: exit.provider.clone(),
                        reason: format!("child exited: {}", exit.reason),
                    }),
                );
            }
            ProviderStatus::Idle | ProviderStatus::Stopped => {}
        }
    }
}

/// Build the supervisor spawn spec from a config entry.
fn spawn_spec(entry: &ProviderEntry) -> SpawnSpec {
    SpawnSpec {
        path: entry.path.clone(),
        runtime: entry.runtime.clone(),
        args: entry.args.clone(),
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut socket_rx: UnboundedReceiver<SocketEvent>,
    mut exit_rx: UnboundedReceiver<ProviderExit>,
) {
    loop {
        tokio::select! {
            event = socket_rx.recv() => {
                match event {
                    Some(event) => shared.handle_socket_event(event),
                    None => break,
                }
            }
            exit = exit_rx.recv() => {
                match exit {
                    Some(exit) => shared.handle_exit(exit),
                    None => break,
                }
            }
        }
    }
}
