//! Child process supervision for external providers.
//!
//! The supervisor is the only component that touches provider child
//! processes: it spawns them with the right runtime and environment,
//! forwards their stdout/stderr to the host logger, reports exits, and
//! terminates them gracefully (SIGTERM, grace period, SIGKILL).
//!
//! # Runtime selection
//!
//! An explicit `runtime` in the provider config is used verbatim (plus its
//! `args`). Otherwise the runtime is inferred from the entry path's
//! extension:
//!
//! | extension   | runtime                                             |
//! |-------------|-----------------------------------------------------|
//! | `ts`        | `bun --no-cache` when bun is on PATH, else `npx tsx`|
//! | `js`, `mjs` | `node`                                              |
//! | `py`        | `python3`                                           |
//! | anything    | `node`                                              |
//!
//! # Child environment
//!
//! Three variables are injected on top of the inherited environment:
//! `TOOLHUB_SOCKET` (absolute socket path), `TOOLHUB_PROVIDER_MODE=1`,
//! and `TOOLHUB_PROVIDER_NAME`. The child inherits the parent working
//! directory and PATH.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

/// Environment variable carrying the hub socket path.
pub const ENV_SOCKET: &str = "TOOLHUB_SOCKET";
/// Marker variable telling the provider library to start in provider mode.
pub const ENV_PROVIDER_MODE: &str = "TOOLHUB_PROVIDER_MODE";
/// Environment variable carrying the assigned provider name.
pub const ENV_PROVIDER_NAME: &str = "TOOLHUB_PROVIDER_NAME";

/// What to launch for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    /// Entry-point path of the provider program.
    pub path: PathBuf,
    /// Explicit runtime command (used verbatim when set).
    pub runtime: Option<String>,
    /// Arguments for an explicit runtime command.
    pub args: Vec<String>,
}

/// Resolved launch command.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments preceding the entry path.
    pub args: Vec<String>,
}

/// Exit notification delivered to the provider manager.
#[derive(Debug, Clone)]
pub struct ProviderExit {
    /// Provider whose child exited.
    pub provider: String,
    /// Exit description (status code or signal).
    pub reason: String,
    /// True when the exit was requested via [`ProcessSupervisor::stop`].
    pub expected: bool,
}

/// Spawn metadata for a live child.
#[derive(Debug, Clone)]
pub struct ChildInfo {
    /// OS process id.
    pub pid: u32,
    /// When the child was spawned.
    pub started_at: SystemTime,
    /// How many times this provider has been (re)spawned.
    pub restart_count: u32,
}

struct ChildRecord {
    info: ChildInfo,
    /// Set before a deliberate stop so the monitor reports it as expected.
    stopping: Arc<std::sync::atomic::AtomicBool>,
}

/// Spawns, monitors, and terminates external provider children.
///
/// Each child is owned solely by the supervisor; no other component
/// signals it directly.
pub struct ProcessSupervisor {
    socket_path: PathBuf,
    shutdown_grace: Duration,
    exit_tx: UnboundedSender<ProviderExit>,
    children: Mutex<HashMap<String, ChildRecord>>,
    /// Spawn counts per provider, kept for the host lifetime.
    restart_counts: Mutex<HashMap<String, u32>>,
}

impl ProcessSupervisor {
    /// Create a supervisor that points children at `socket_path` and
    /// reports exits on `exit_tx`.
    pub fn new(
        socket_path: PathBuf,
        shutdown_grace: Duration,
        exit_tx: UnboundedSender<ProviderExit>,
    ) -> Self {
        Self {
            socket_path,
            shutdown_grace,
            exit_tx,
            children: Mutex::new(HashMap::new()),
            restart_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a child process for `provider`.
    ///
    /// stdout/stderr are piped and forwarded line-by-line to the host
    /// logger under a `[provider:{name}]` prefix. A monitor task reports
    /// the eventual exit.
    ///
    /// # Errors
    ///
    /// Returns an error if a child for this provider is already running or
    /// the process cannot be spawned.
    pub fn spawn(&self, provider: &str, spec: &SpawnSpec) -> Result<ChildInfo> {
        let restart_count = {
            let children = self.children.lock().expect("supervisor lock poisoned");
            if children.contains_key(provider) {
                anyhow::bail!("Provider '{provider}' already has a running child");
            }
            drop(children);
            self.next_restart_count(provider)
        };

        let runtime = resolve_runtime(spec);
        log::info!(
            "[Supervisor] Spawning {provider}: {} {:?} {}",
            runtime.program,
            runtime.args,
            spec.path.display()
        );

        let mut cmd = tokio::process::Command::new(&runtime.program);
        cmd.args(&runtime.args)
            .arg(&spec.path)
            .env(ENV_SOCKET, &self.socket_path)
            .env(ENV_PROVIDER_MODE, "1")
            .env(ENV_PROVIDER_NAME, provider)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn provider '{provider}'"))?;
        let pid = child
            .id()
            .context("Spawned child has no pid (already reaped?)")?;

        if let Some(stdout) = child.stdout.take() {
            spawn_output_forwarder(provider.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_forwarder(provider.to_string(), "stderr", stderr);
        }

        let info = ChildInfo {
            pid,
            started_at: SystemTime::now(),
            restart_count,
        };
        let stopping = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let mut children = self.children.lock().expect("supervisor lock poisoned");
            children.insert(
                provider.to_string(),
                ChildRecord {
                    info: info.clone(),
                    stopping: Arc::clone(&stopping),
                },
            );
        }

        // Monitor task owns the Child; it reaps the exit status and
        // reports it. Deliberate stops are flagged via `stopping`.
        let exit_tx = self.exit_tx.clone();
        let provider_name = provider.to_string();
        tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) => match status.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                },
                Err(e) => format!("wait failed: {e}"),
            };
            let expected = stopping.load(std::sync::atomic::Ordering::SeqCst);
            log::info!("[Supervisor] Provider {provider_name} exited: {reason} (expected: {expected})");
            let _ = exit_tx.send(ProviderExit {
                provider: provider_name,
                reason,
                expected,
            });
        });

        Ok(info)
    }

    /// Stop a provider's child: SIGTERM, wait up to the grace period,
    /// then SIGKILL. Idempotent; stopping a provider with no child is a
    /// no-op.
    ///
    /// The child record is removed regardless of how the child died; the
    /// monitor task still reports the exit (flagged as expected).
    pub async fn stop(&self, provider: &str) {
        let record = {
            let mut children = self.children.lock().expect("supervisor lock poisoned");
            children.remove(provider)
        };
        let Some(record) = record else {
            return;
        };

        record
            .stopping
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let pid = record.info.pid as libc::pid_t;

        log::info!("[Supervisor] Stopping {provider} (pid {pid}) with SIGTERM");
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }

        // Poll for exit during the grace period; kill(pid, 0) failing
        // means the process is gone (reaped by the monitor task).
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        while tokio::time::Instant::now() < deadline {
            if unsafe { libc::kill(pid, 0) } != 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        log::warn!("[Supervisor] Provider {provider} ignored SIGTERM, sending SIGKILL");
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }

    /// Stop every running child.
    pub async fn stop_all(&self) {
        let providers: Vec<String> = {
            let children = self.children.lock().expect("supervisor lock poisoned");
            children.keys().cloned().collect()
        };
        for provider in providers {
            self.stop(&provider).await;
        }
    }

    /// Spawn metadata for a provider's live child.
    pub fn info(&self, provider: &str) -> Option<ChildInfo> {
        self.children
            .lock()
            .expect("supervisor lock poisoned")
            .get(provider)
            .map(|r| r.info.clone())
    }

    /// Drop the record for a child that exited on its own.
    ///
    /// Called by the manager when it processes an unexpected exit, so a
    /// later respawn is not misread as a duplicate.
    pub fn forget(&self, provider: &str) {
        self.children
            .lock()
            .expect("supervisor lock poisoned")
            .remove(provider);
    }

    /// Restart count for the next spawn of `provider`.
    fn next_restart_count(&self, provider: &str) -> u32 {
        let mut counts = self
            .restart_counts
            .lock()
            .expect("restart count lock poisoned");
        let entry = counts.entry(provider.to_string()).or_insert(0);
        let current = *entry;
        *entry += 1;
        current
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let children = self.children.lock().expect("supervisor lock poisoned");
        f.debug_struct("ProcessSupervisor")
            .field("socket_path", &self.socket_path)
            .field("children", &children.len())
            .finish()
    }
}

/// Forward one piped output stream to the host logger.
fn spawn_output_forwarder(
    provider: String,
    stream: &'static str,
    pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stream == "stderr" {
                log::warn!("[provider:{provider}] {line}");
            } else {
                log::info!("[provider:{provider}] {line}");
            }
        }
    });
}

/// Resolve the launch command for a spawn spec.
pub fn resolve_runtime(spec: &SpawnSpec) -> RuntimeCommand {
    resolve_runtime_with(spec, is_on_path)
}

/// Runtime resolution with an injectable PATH probe (unit tested).
fn resolve_runtime_with(spec: &SpawnSpec, on_path: impl Fn(&str) -> bool) -> RuntimeCommand {
    if let Some(runtime) = &spec.runtime {
        return RuntimeCommand {
            program: runtime.clone(),
            args: spec.args.clone(),
        };
    }

    let ext = spec
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match ext {
        "ts" => {
            if on_path("bun") {
                // bun executes TypeScript directly; --no-cache busts its
                // transpile cache so edited sources always take effect.
                RuntimeCommand {
                    program: "bun".to_string(),
                    args: vec!["--no-cache".to_string()],
                }
            } else {
                RuntimeCommand {
                    program: "npx".to_string(),
                    args: vec!["tsx".to_string()],
                }
            }
        }
        "py" => RuntimeCommand {
            program: "python3".to_string(),
            args: vec![],
        },
        // js, mjs, and anything unrecognized go to the default runtime
        _ => RuntimeCommand {
            program: "node".to_string(),
            args: vec![],
        },
    }
}

/// Check whether `program` exists as an executable on PATH.
fn is_on_path(program: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| is_executable(&dir.join(program)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn spec_for(path: &str) -> SpawnSpec {
        SpawnSpec {
            path: PathBuf::from(path),
            runtime: None,
            args: vec![],
        }
    }

    #[test]
    fn test_explicit_runtime_used_verbatim() {
        let spec = SpawnSpec {
            path: PathBuf::from("provider.wasm"),
            runtime: Some("wasmtime".to_string()),
            args: vec!["--dir=.".to_string()],
        };
        let cmd = resolve_runtime_with(&spec, |_| false);
        assert_eq!(cmd.program, "wasmtime");
        assert_eq!(cmd.args, vec!["--dir=."]);
    }

    #[test]
    fn test_typescript_prefers_bun_when_available() {
        let cmd = resolve_runtime_with(&spec_for("p.ts"), |prog| prog == "bun");
        assert_eq!(cmd.program, "bun");
        assert_eq!(cmd.args, vec!["--no-cache"]);
    }

    #[test]
    fn test_typescript_falls_back_to_tsx_loader() {
        let cmd = resolve_runtime_with(&spec_for("p.ts"), |_| false);
        assert_eq!(cmd.program, "npx");
        assert_eq!(cmd.args, vec!["tsx"]);
    }

    #[test]
    fn test_javascript_uses_node() {
        for path in ["p.js", "p.mjs"] {
            let cmd = resolve_runtime_with(&spec_for(path), |_| false);
            assert_eq!(cmd.program, "node", "for {path}");
            assert!(cmd.args.is_empty());
        }
    }

    #[test]
    fn test_python_uses_python3() {
        let cmd = resolve_runtime_with(&spec_for("p.py"), |_| false);
        assert_eq!(cmd.program, "python3");
    }

    #[test]
    fn test_unknown_extension_uses_default_runtime() {
        for path in ["p.rb", "p", "p.sh"] {
            let cmd = resolve_runtime_with(&spec_for(path), |_| false);
            assert_eq!(cmd.program, "node", "for {path}");
        }
    }

    #[tokio::test]
    async fn test_spawn_reports_unexpected_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            PathBuf::from("/tmp/unused.sock"),
            Duration::from_secs(1),
            tx,
        );

        let spec = SpawnSpec {
            path: PathBuf::from("exit 3"),
            runtime: Some("sh".to_string()),
            args: vec!["-c".to_string()],
        };
        let info = supervisor.spawn("short", &spec).unwrap();
        assert!(info.pid > 0);

        let exit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for exit")
            .expect("Channel closed");
        assert_eq!(exit.provider, "short");
        assert_eq!(exit.reason, "exit code 3");
        assert!(!exit.expected);
    }

    #[tokio::test]
    async fn test_stop_terminates_child_and_marks_expected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            PathBuf::from("/tmp/unused.sock"),
            Duration::from_secs(2),
            tx,
        );

        let spec = SpawnSpec {
            path: PathBuf::from("sleep 30"),
            runtime: Some("sh".to_string()),
            args: vec!["-c".to_string()],
        };
        supervisor.spawn("sleeper", &spec).unwrap();
        assert!(supervisor.info("sleeper").is_some());

        supervisor.stop("sleeper").await;
        assert!(supervisor.info("sleeper").is_none());

        let exit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for exit")
            .expect("Channel closed");
        assert_eq!(exit.provider, "sleeper");
        assert!(exit.expected, "stop() exits must be flagged expected");
    }

    #[tokio::test]
    async fn test_stop_without_child_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            PathBuf::from("/tmp/unused.sock"),
            Duration::from_secs(1),
            tx,
        );
        supervisor.stop("ghost").await;
    }

    #[tokio::test]
    async fn test_duplicate_spawn_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            PathBuf::from("/tmp/unused.sock"),
            Duration::from_secs(1),
            tx,
        );

        let spec = SpawnSpec {
            path: PathBuf::from("sleep 30"),
            runtime: Some("sh".to_string()),
            args: vec!["-c".to_string()],
        };
        supervisor.spawn("dup", &spec).unwrap();
        let err = supervisor.spawn("dup", &spec).unwrap_err();
        assert!(err.to_string().contains("already"), "got: {err}");

        supervisor.stop("dup").await;
    }

    #[tokio::test]
    async fn test_child_env_injection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("env.txt");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            PathBuf::from("/tmp/hub-test.sock"),
            Duration::from_secs(1),
            tx,
        );

        let script = format!(
            "printf '%s %s %s' \"$TOOLHUB_SOCKET\" \"$TOOLHUB_PROVIDER_MODE\" \"$TOOLHUB_PROVIDER_NAME\" > {}",
            out.display()
        );
        let spec = SpawnSpec {
            path: PathBuf::from(script),
            runtime: Some("sh".to_string()),
            args: vec!["-c".to_string()],
        };
        supervisor.spawn("envcheck", &spec).unwrap();

        let _ = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "/tmp/hub-test.sock 1 envcheck");
    }
}
