//! Hot-reload coordination.
//!
//! Observes two change sources and drives the right provider transition
//! for each:
//!
//! - **Source files**: any mutation of an external provider's entry file
//!   restarts that provider, unconditionally. The `notify` watcher's
//!   callback resolves paths to provider names right away and feeds them
//!   to a debouncing worker; deletes and pure access events never
//!   restart.
//! - **Configuration**: [`HotReloadCoordinator::update_config`] diffs the
//!   new config against the current snapshot and classifies each
//!   provider's change using its `change_analysis` trigger lists — restart
//!   (fresh child, prior state discarded), reinitialize (running child
//!   absorbs the new config through its `initialize` hook), or ignore.
//!
//! Active only when `dev.hot_reload` is set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{Config, ProviderEntry};
use crate::constants::RELOAD_DEBOUNCE;
use crate::provider::ProviderManager;

/// What a configuration change means for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Spawn a fresh child; all prior state is discarded.
    Restart,
    /// Running child absorbs the new config via `initialize`.
    Reinit,
    /// Change matches neither trigger set.
    Ignore,
}

/// Watches provider sources and applies config updates.
pub struct HotReloadCoordinator {
    manager: Arc<ProviderManager>,
    /// Kept alive to maintain the OS watches.
    _watcher: RecommendedWatcher,
    worker: JoinHandle<()>,
    snapshot: std::sync::Mutex<Config>,
}

impl HotReloadCoordinator {
    /// Start watching provider sources.
    ///
    /// Returns `None` when `dev.hot_reload` is off. Providers whose entry
    /// path cannot be resolved are logged and skipped; they still reload
    /// on config changes.
    pub fn start(manager: Arc<ProviderManager>, config: &Config) -> Result<Option<Self>> {
        if !config.dev.hot_reload {
            return Ok(None);
        }

        let (change_tx, change_rx) = mpsc::unbounded_channel::<String>();
        let watcher = spawn_source_watcher(&config.providers, change_tx)?;
        let worker = tokio::spawn(restart_loop(Arc::clone(&manager), change_rx));

        Ok(Some(Self {
            manager,
            _watcher: watcher,
            worker,
            snapshot: std::sync::Mutex::new(config.clone()),
        }))
    }

    /// Apply a new configuration: classify each provider's change and
    /// drive the restart or reinitialize it calls for.
    pub async fn update_config(&self, new_config: Config) {
        let old = {
            let snapshot = self.snapshot.lock().expect("snapshot lock poisoned");
            snapshot.clone()
        };

        for (name, new_entry) in &new_config.providers {
            let Some(old_entry) = old.providers.get(name) else {
                log::warn!("[Reload] Provider {name} added at runtime is not supported, ignoring");
                continue;
            };

            match classify_entry_change(old_entry, new_entry) {
                ChangeDecision::Ignore => {
                    if old_entry != new_entry {
                        log::debug!("[Reload] Config change for {name} matches no trigger, ignoring");
                        let _ = self.manager.update_provider_entry(name, new_entry.clone());
                    }
                }
                ChangeDecision::Restart => {
                    log::info!("[Reload] Config change restarts provider {name}");
                    let _ = self.manager.update_provider_entry(name, new_entry.clone());
                    if let Err(e) = self.manager.reload_provider(name).await {
                        log::error!("[Reload] Restart of {name} failed: {e:#}");
                    }
                }
                ChangeDecision::Reinit => {
                    log::info!("[Reload] Config change reinitializes provider {name}");
                    if let Err(e) = self
                        .manager
                        .reinitialize_provider(name, new_entry.config.clone())
                    {
                        log::error!("[Reload] Reinitialize of {name} failed: {e:#}");
                    }
                }
            }
        }

        *self.snapshot.lock().expect("snapshot lock poisoned") = new_config;
    }

    /// Stop watching. Providers keep running.
    pub fn shutdown(self) {
        self.worker.abort();
    }
}

impl std::fmt::Debug for HotReloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloadCoordinator").finish_non_exhaustive()
    }
}

/// Watch every resolvable provider entry file.
///
/// The returned watcher owns the OS watches; dropping it stops them. Its
/// event callback runs on the notify thread, filters down to restart-
/// worthy mutations of registered entry paths, and pushes the owning
/// provider's name into `change_tx`.
fn spawn_source_watcher(
    providers: &HashMap<String, ProviderEntry>,
    change_tx: mpsc::UnboundedSender<String>,
) -> Result<RecommendedWatcher> {
    // Entry paths are resolved up front; the index is frozen into the
    // callback for the watcher's lifetime.
    let mut path_index: HashMap<PathBuf, String> = HashMap::new();
    for (name, entry) in providers {
        match entry.path.canonicalize() {
            Ok(path) => {
                path_index.insert(path, name.clone());
            }
            Err(e) => {
                log::warn!(
                    "[Reload] Cannot resolve {} for provider {name}: {e}",
                    entry.path.display()
                );
            }
        }
    }

    let index = path_index.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                if !source_change_restarts(&event.kind) {
                    return;
                }
                for path in &event.paths {
                    if let Some(provider) = index.get(path) {
                        // Receiver gone means the coordinator shut down.
                        let _ = change_tx.send(provider.clone());
                    }
                }
            }
            Err(e) => log::warn!("[Reload] Watcher error: {e}"),
        }
    })
    .context("Failed to create source watcher")?;

    for (path, name) in &path_index {
        // Watch the parent directory: editors replace files by rename,
        // which drops a watch registered on the file itself.
        let dir = path.parent().unwrap_or(path);
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => log::info!(
                "[Reload] Watching {} for provider {name}",
                path.display()
            ),
            Err(e) => log::warn!(
                "[Reload] Failed to watch {} for provider {name}: {e}",
                dir.display()
            ),
        }
    }

    Ok(watcher)
}

/// True for events that change an entry file's content on disk.
///
/// Creates and modifies (including renames, which is how most editors
/// save) restart; a delete leaves nothing to respawn and is ignored, as
/// are access and other bookkeeping events.
fn source_change_restarts(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Consume provider names from the watcher callback, debounce bursts,
/// restart each affected provider once per burst.
async fn restart_loop(
    manager: Arc<ProviderManager>,
    mut change_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(first) = change_rx.recv().await {
        // Editors produce bursts (write + rename + chmod); collect the
        // burst so one save means one restart.
        tokio::time::sleep(RELOAD_DEBOUNCE).await;

        let mut affected = vec![first];
        while let Ok(name) = change_rx.try_recv() {
            if !affected.contains(&name) {
                affected.push(name);
            }
        }

        for provider in affected {
            log::info!("[Reload] Source change detected, restarting provider {provider}");
            if let Err(e) = manager.reload_provider(&provider).await {
                log::error!("[Reload] Restart of {provider} failed: {e:#}");
            }
        }
    }
}

/// Classify what an updated provider entry requires.
///
/// Launch changes (path, runtime, args) always restart. Config-blob
/// changes are matched against the entry's trigger lists; with no
/// `change_analysis` declared, config changes are ignored.
pub fn classify_entry_change(old: &ProviderEntry, new: &ProviderEntry) -> ChangeDecision {
    if old.path != new.path || old.runtime != new.runtime || old.args != new.args {
        return ChangeDecision::Restart;
    }

    let changed = changed_keys(&old.config, &new.config);
    if changed.is_empty() {
        return ChangeDecision::Ignore;
    }

    let Some(analysis) = &new.change_analysis else {
        return ChangeDecision::Ignore;
    };

    if changed.iter().any(|k| analysis.restart_triggers.contains(k)) {
        ChangeDecision::Restart
    } else if changed.iter().any(|k| analysis.reinit_triggers.contains(k)) {
        ChangeDecision::Reinit
    } else {
        ChangeDecision::Ignore
    }
}

/// Top-level keys whose value differs between two config blobs.
///
/// Non-object blobs that differ report the pseudo-key `*`, which can be
/// listed in a trigger set to match whole-blob replacement.
pub fn changed_keys(old: &Value, new: &Value) -> Vec<String> {
    match (old.as_object(), new.as_object()) {
        (Some(old_map), Some(new_map)) => {
            let mut keys: Vec<String> = Vec::new();
            for key in old_map.keys().chain(new_map.keys()) {
                if keys.iter().any(|k| k == key) {
                    continue;
                }
                if old_map.get(key) != new_map.get(key) {
                    keys.push(key.clone());
                }
            }
            keys
        }
        _ => {
            if old == new {
                Vec::new()
            } else {
                vec!["*".to_string()]
            }
        }
    }
}
