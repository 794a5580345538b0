//! Authoritative tool registry shared across provider kinds.
//!
//! The registry is the single source of truth consulted by the tool-list
//! RPC and the call router. It holds two indices — tool name → descriptor
//! and provider → owned tool names — behind one mutex with a small, total
//! API. Mutations happen only through [`ToolRegistry::replace_provider_tools`]
//! and [`ToolRegistry::clear_provider`], and each mutation is atomic: an
//! observer sees either the full prior set or the full new set for a
//! provider, never a partial swap.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::events::HostEvent;
use crate::protocol::ToolSpec;

/// Registry mutation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A declared tool name is already owned by a different provider.
    /// The registry retains its prior state.
    #[error("tool name '{name}' is already registered by provider '{owner}'")]
    NameCollision {
        /// The colliding tool name.
        name: String,
        /// The provider that currently owns it.
        owner: String,
    },
}

/// A registered tool: its wire spec plus the provider that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    /// The tool as declared by its provider.
    pub spec: ToolSpec,
    /// Owning provider name.
    pub provider: String,
}

#[derive(Default)]
struct Indices {
    tools: HashMap<String, RegisteredTool>,
    by_provider: HashMap<String, BTreeSet<String>>,
}

/// Shared tool registry. Cheap to share via `Arc`.
pub struct ToolRegistry {
    inner: Mutex<Indices>,
    event_tx: broadcast::Sender<HostEvent>,
}

impl ToolRegistry {
    /// Create an empty registry publishing on `event_tx`.
    pub fn new(event_tx: broadcast::Sender<HostEvent>) -> Self {
        Self {
            inner: Mutex::new(Indices::default()),
            event_tx,
        }
    }

    /// Atomically replace all tools owned by `provider` with `new_tools`.
    ///
    /// Duplicate names within `new_tools` keep the last occurrence.
    ///
    /// `tool-unregistered` is emitted for every removed name and
    /// `tool-registered` for every installed name, strictly after the
    /// swap has committed.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NameCollision`] if any name in `new_tools` is
    /// currently owned by a *different* provider. On failure the prior
    /// state is fully retained and no events are emitted.
    pub fn replace_provider_tools(
        &self,
        provider: &str,
        new_tools: Vec<ToolSpec>,
    ) -> Result<(), RegistryError> {
        let (removed, added) = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");

            for tool in &new_tools {
                if let Some(existing) = inner.tools.get(&tool.name) {
                    if existing.provider != provider {
                        return Err(RegistryError::NameCollision {
                            name: tool.name.clone(),
                            owner: existing.provider.clone(),
                        });
                    }
                }
            }

            let removed: Vec<String> = inner
                .by_provider
                .remove(provider)
                .unwrap_or_default()
                .into_iter()
                .collect();
            for name in &removed {
                inner.tools.remove(name);
            }

            let mut added = Vec::with_capacity(new_tools.len());
            let mut names = BTreeSet::new();
            for spec in new_tools {
                let name = spec.name.clone();
                if names.insert(name.clone()) {
                    added.push(name.clone());
                } else {
                    log::warn!(
                        "[Registry] Provider {provider} declared '{name}' twice, keeping last"
                    );
                }
                inner.tools.insert(
                    name,
                    RegisteredTool {
                        spec,
                        provider: provider.to_string(),
                    },
                );
            }
            if !names.is_empty() {
                inner.by_provider.insert(provider.to_string(), names);
            }

            (removed, added)
        };

        // Events go out only after the lock is released and the swap is
        // visible to every reader.
        for name in removed {
            let _ = self.event_tx.send(HostEvent::ToolUnregistered {
                tool: name,
                provider: provider.to_string(),
            });
        }
        for name in added {
            let _ = self.event_tx.send(HostEvent::ToolRegistered {
                tool: name,
                provider: provider.to_string(),
            });
        }
        Ok(())
    }

    /// Remove all tools owned by `provider`.
    pub fn clear_provider(&self, provider: &str) {
        // Replacing with the empty set cannot collide.
        let _ = self.replace_provider_tools(provider, Vec::new());
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .tools
            .get(name)
            .cloned()
    }

    /// All registered tools, in deterministic order by name.
    pub fn list(&self) -> Vec<RegisteredTool> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut tools: Vec<RegisteredTool> = inner.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        tools
    }

    /// Names currently owned by `provider`, sorted.
    pub fn provider_tools(&self, provider: &str) -> Vec<String> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .by_provider
            .get(provider)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("registry lock poisoned");
        f.debug_struct("ToolRegistry")
            .field("tools", &inner.tools.len())
            .field("providers", &inner.by_provider.len())
            .finish()
    }
}
