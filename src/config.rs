//! Host configuration.
//!
//! The core consumes an abstract configuration object; this module gives
//! it a concrete JSON shape plus `TOOLHUB_*` environment overrides.
//! Key names are camelCase to match what the outer configuration loader
//! and script-runtime providers see.
//!
//! ```json
//! {
//!   "providers": {
//!     "calc": {
//!       "type": "file",
//!       "path": "./providers/calc.py",
//!       "config": { "precision": 2 },
//!       "changeAnalysis": {
//!         "restartTriggers": ["endpoint"],
//!         "reinitTriggers": ["precision"]
//!       }
//!     }
//!   },
//!   "performance": { "toolCallTimeout": 30000 },
//!   "dev": { "hotReload": true }
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which configuration changes restart the child vs. reinitialize it in
/// place. Trigger entries are top-level keys of the provider `config`
/// blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysis {
    /// Keys whose change requires a fresh child process.
    #[serde(default)]
    pub restart_triggers: Vec<String>,
    /// Keys the running child can absorb through its `initialize` hook.
    #[serde(default)]
    pub reinit_triggers: Vec<String>,
}

/// One external provider declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    /// Provider kind; only `"file"` is defined today.
    #[serde(rename = "type", default = "default_provider_type")]
    pub kind: String,
    /// Entry-point path of the provider program.
    pub path: PathBuf,
    /// Explicit runtime command. When set it is used verbatim; otherwise
    /// the runtime is inferred from the path's extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    /// Extra arguments for an explicit runtime command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Provider-specific configuration blob, passed through opaquely.
    #[serde(default)]
    pub config: Value,
    /// Reload classification rules; absent means every config change
    /// restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_analysis: Option<ChangeAnalysis>,
}

fn default_provider_type() -> String {
    "file".to_string()
}

/// Timeout knobs, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    /// Outer MCP request timeout (consumed by the request layer, carried
    /// here so one object configures the whole host).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Tool call deadline.
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout: u64,
    /// How long a spawned child may take to send `register`.
    #[serde(default = "default_registration_timeout")]
    pub provider_registration_timeout: u64,
    /// Grace between SIGTERM and SIGKILL when stopping a child.
    #[serde(default = "default_shutdown_grace")]
    pub provider_shutdown_grace: u64,
}

fn default_request_timeout() -> u64 {
    60_000
}
fn default_tool_call_timeout() -> u64 {
    crate::constants::TOOL_CALL_TIMEOUT.as_millis() as u64
}
fn default_registration_timeout() -> u64 {
    crate::constants::PROVIDER_REGISTRATION_TIMEOUT.as_millis() as u64
}
fn default_shutdown_grace() -> u64 {
    crate::constants::PROVIDER_SHUTDOWN_GRACE.as_millis() as u64
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            tool_call_timeout: default_tool_call_timeout(),
            provider_registration_timeout: default_registration_timeout(),
            provider_shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl PerformanceConfig {
    /// Tool call deadline as a [`Duration`].
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_call_timeout)
    }

    /// Registration deadline as a [`Duration`].
    pub fn provider_registration_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_registration_timeout)
    }

    /// Shutdown grace as a [`Duration`].
    pub fn provider_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.provider_shutdown_grace)
    }
}

/// Development-mode switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevConfig {
    /// Watch provider sources and config for changes and reload live.
    #[serde(default)]
    pub hot_reload: bool,
}

/// Complete host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// External provider declarations, keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Timeout knobs.
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Development-mode switches.
    #[serde(default)]
    pub dev: DevConfig,
    /// Socket path override; defaults to the uid-scoped temp directory
    /// (see [`crate::paths`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a JSON file and apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TOOLHUB_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TOOLHUB_SOCKET") {
            self.socket_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = std::env::var("TOOLHUB_HOT_RELOAD") {
            self.dev.hot_reload = val.eq_ignore_ascii_case("true") || val == "1";
        }

        if let Ok(val) = std::env::var("TOOLHUB_TOOL_CALL_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.performance.tool_call_timeout = ms;
            }
        }
    }
}
