//! In-process (built-in) providers.
//!
//! A built-in provider contributes tools that execute directly inside the
//! host with no child process and no socket. It shares the tool registry with
//! external providers and is indistinguishable from them on the
//! `list_tools` / `call_tool` surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::protocol::ToolSpec;

/// Handler function for one built-in tool.
///
/// Runs on a blocking worker; may block. Returns the result blob or a
/// failure reason that surfaces as `HandlerError`.
pub type BuiltinHandler =
    Arc<dyn Fn(&Value, &BuiltinContext) -> Result<Value, String> + Send + Sync>;

/// Execution context handed to built-in tool handlers.
#[derive(Clone)]
pub struct BuiltinContext {
    provider: String,
    state: Arc<Mutex<Value>>,
}

impl BuiltinContext {
    pub(crate) fn new(provider: String) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(Value::Null)),
        }
    }

    /// Name of the provider this handler belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Snapshot of the provider state.
    pub fn state(&self) -> Value {
        self.state.lock().expect("builtin state lock poisoned").clone()
    }

    /// Replace the provider state.
    pub fn set_state(&self, state: Value) {
        *self.state.lock().expect("builtin state lock poisoned") = state;
    }

    /// Log through the host logger, scoped to this provider.
    pub fn log(&self, level: log::Level, message: &str) {
        log::log!(level, "[provider:{}] {message}", self.provider);
    }
}

impl std::fmt::Debug for BuiltinContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinContext")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// One tool contributed by a built-in provider.
pub struct BuiltinTool {
    /// Declared metadata, installed into the registry.
    pub spec: ToolSpec,
    /// The in-process handler.
    pub handler: BuiltinHandler,
}

impl BuiltinTool {
    /// Convenience constructor.
    pub fn new(
        spec: ToolSpec,
        handler: impl Fn(&Value, &BuiltinContext) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            spec,
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for BuiltinTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinTool")
            .field("name", &self.spec.name)
            .finish_non_exhaustive()
    }
}

/// A provider object registered by host code.
pub trait BuiltinProvider: Send + Sync {
    /// Unique provider name.
    fn name(&self) -> &str;

    /// Version string (informational).
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// The complete tool set this provider contributes.
    fn tools(&self) -> Vec<BuiltinTool>;

    /// Called once at registration with the host configuration blob.
    ///
    /// A returned error aborts the registration.
    fn initialize(&self, _config: &Value, _ctx: &BuiltinContext) -> Result<(), String> {
        Ok(())
    }

    /// Called when the host shuts down.
    fn dispose(&self) {}
}

/// Handler table built from a [`BuiltinProvider`] at registration time.
pub(crate) struct BuiltinHost {
    pub(crate) provider: Arc<dyn BuiltinProvider>,
    pub(crate) handlers: HashMap<String, BuiltinHandler>,
    pub(crate) ctx: BuiltinContext,
}

impl BuiltinHost {
    /// Run initialize and index the provider's handlers by tool name.
    ///
    /// Returns the host plus the tool specs to install in the registry.
    pub(crate) fn prepare(
        provider: Arc<dyn BuiltinProvider>,
        config: &Value,
    ) -> Result<(Self, Vec<ToolSpec>), String> {
        let ctx = BuiltinContext::new(provider.name().to_string());
        provider.initialize(config, &ctx)?;

        let mut handlers = HashMap::new();
        let mut specs = Vec::new();
        for tool in provider.tools() {
            handlers.insert(tool.spec.name.clone(), tool.handler);
            specs.push(tool.spec);
        }

        Ok((
            Self {
                provider,
                handlers,
                ctx,
            },
            specs,
        ))
    }
}

impl std::fmt::Debug for BuiltinHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinHost")
            .field("provider", &self.provider.name())
            .field("tools", &self.handlers.len())
            .finish()
    }
}
