//! toolhub - Tool provider hub.
//!
//! This crate hosts a unified tool namespace for MCP servers: named tools
//! contributed by in-process (built-in) providers and by external
//! providers running as supervised child processes that speak
//! newline-delimited JSON over a Unix domain socket.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────┐
//!            │   ProviderManager    │
//!            │  - owns all state    │
//!            │  - runs event loop   │
//!            └──────────┬───────────┘
//!                       │
//!        ┌──────────┬───┴───────┬─────────────┐
//!        │          │           │             │
//!        ▼          ▼           ▼             ▼
//!   ToolRegistry  SocketHub  CallTracker  ProcessSupervisor
//!   (name→tool)   (IPC)      (call ids)   (child processes)
//! ```
//!
//! The MCP request layer consumes the manager's three-part surface:
//! [`ProviderManager::list_tools`], [`ProviderManager::call_tool`], and
//! the [`events::HostEvent`] stream. Everything else — frame codec,
//! socket hub, registry, call tracker, supervisor — is internal plumbing
//! the manager coordinates.
//!
//! # Modules
//!
//! - [`provider`] - Provider lifecycle state machine and call routing
//! - [`socket`] - Unix socket hub and frame codec
//! - [`supervisor`] - Child process spawning and termination
//! - [`registry`] - Shared tool registry with atomic provider swaps
//! - [`calls`] - In-flight call correlation and timeouts
//! - [`reload`] - Hot reload of provider sources and configuration
//! - [`runtime`] - The library provider child processes link against

pub mod calls;
pub mod config;
pub mod constants;
pub mod events;
pub mod paths;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod reload;
pub mod runtime;
pub mod socket;
pub mod supervisor;

// Re-export commonly used types
pub use calls::CallError;
pub use config::Config;
pub use events::HostEvent;
pub use protocol::ToolSpec;
pub use provider::builtin::{BuiltinContext, BuiltinProvider, BuiltinTool};
pub use provider::{ProviderManager, ProviderStatus};
pub use registry::RegisteredTool;
pub use reload::HotReloadCoordinator;
pub use runtime::ProviderRuntime;
