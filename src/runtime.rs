//! Provider-side runtime.
//!
//! The library a provider process links to serve tools over the hub
//! socket. On startup it reads the hub's environment contract
//! ([`crate::supervisor::ENV_SOCKET`], [`ENV_PROVIDER_MODE`],
//! [`ENV_PROVIDER_NAME`]), connects, registers its tool list, then serves
//! `tool_call` frames until the socket closes.
//!
//! ```no_run
//! use serde_json::json;
//! use toolhub::protocol::ToolSpec;
//! use toolhub::runtime::ProviderRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     ProviderRuntime::new("1.0.0", "arithmetic tools")
//!         .tool(
//!             ToolSpec {
//!                 name: "add".to_string(),
//!                 description: "add two numbers".to_string(),
//!                 input_schema: json!({"a": "number", "b": "number"}),
//!                 output_schema: None,
//!             },
//!             |args, _ctx| {
//!                 let a = args["a"].as_f64().ok_or("missing a")?;
//!                 let b = args["b"].as_f64().ok_or("missing b")?;
//!                 Ok(json!({"result": a + b}))
//!             },
//!         )
//!         .run()
//!         .await
//! }
//! ```
//!
//! Handlers run on their own tasks, so several calls can be in flight at
//! once; responses correlate by call id, not by completion order.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::protocol::{LogPayload, RegisterPayload, ToolSpec, WireMessage};
use crate::socket::framing::{encode, FrameDecoder};
use crate::supervisor::{ENV_PROVIDER_MODE, ENV_PROVIDER_NAME, ENV_SOCKET};

/// How many times to retry connecting to the hub socket on startup.
///
/// The hub spawns the child immediately after binding; a few retries with
/// linear backoff cover the window where the socket is not accepting yet.
const CONNECT_RETRIES: u32 = 5;

/// Base delay between connect retries; attempt `n` waits `n * base`.
const CONNECT_RETRY_BASE: Duration = Duration::from_millis(300);

/// Handler for one tool. Returns the result blob, or a reason string that
/// reaches the caller as a `HandlerError`.
pub type ToolHandler = Arc<dyn Fn(&Value, &ProviderContext) -> Result<Value, String> + Send + Sync>;

/// State migration hook: `(new_config, previous_state) -> new_state`.
pub type InitializeHook = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Execution context handed to tool handlers in the child.
#[derive(Clone)]
pub struct ProviderContext {
    provider: String,
    state: Arc<Mutex<Value>>,
    out_tx: UnboundedSender<WireMessage>,
}

impl ProviderContext {
    /// The provider name assigned by the hub.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Snapshot of the current provider state.
    pub fn state(&self) -> Value {
        self.state.lock().expect("provider state lock poisoned").clone()
    }

    /// Send a structured log record to the host logger.
    pub fn log(&self, level: &str, message: &str) {
        let _ = self.out_tx.send(WireMessage::Log {
            data: LogPayload {
                level: level.to_string(),
                message: message.to_string(),
                fields: None,
            },
        });
    }
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// A provider program: declared tools plus lifecycle hooks.
pub struct ProviderRuntime {
    version: String,
    description: String,
    tools: Vec<(ToolSpec, ToolHandler)>,
    initialize: Option<InitializeHook>,
}

impl ProviderRuntime {
    /// Start declaring a provider.
    pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            tools: Vec::new(),
            initialize: None,
        }
    }

    /// Declare a tool.
    pub fn tool(
        mut self,
        spec: ToolSpec,
        handler: impl Fn(&Value, &ProviderContext) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.tools.push((spec, Arc::new(handler)));
        self
    }

    /// Install the state migration hook, called with `(new_config,
    /// previous_state)` whenever the hub delivers configuration. The
    /// returned value becomes the new provider state.
    pub fn on_initialize(
        mut self,
        hook: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.initialize = Some(Arc::new(hook));
        self
    }

    /// True when the hub launched this process in provider mode.
    pub fn provider_mode_requested() -> bool {
        matches!(
            std::env::var(ENV_PROVIDER_MODE).as_deref(),
            Ok("1") | Ok("true")
        )
    }

    /// Connect and serve using the environment contract set by the hub.
    ///
    /// # Errors
    ///
    /// Fails when the environment variables are missing or the socket is
    /// unreachable after retries.
    pub async fn run(self) -> Result<()> {
        if !Self::provider_mode_requested() {
            anyhow::bail!("{ENV_PROVIDER_MODE} is not set; not launched by a hub");
        }
        let socket_path = std::env::var(ENV_SOCKET)
            .with_context(|| format!("{ENV_SOCKET} is not set"))?;
        let name = std::env::var(ENV_PROVIDER_NAME)
            .with_context(|| format!("{ENV_PROVIDER_NAME} is not set"))?;
        self.run_with(&PathBuf::from(socket_path), &name).await
    }

    /// Connect to `socket_path`, register as `name`, and serve frames
    /// until the hub closes the connection (which is a clean exit).
    pub async fn run_with(self, socket_path: &Path, name: &str) -> Result<()> {
        let stream = connect_with_retries(socket_path).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write_half.write_all(&encode(&msg)).await.is_err() {
                    break;
                }
                if write_half.flush().await.is_err() {
                    break;
                }
            }
        });

        let specs: Vec<ToolSpec> = self.tools.iter().map(|(spec, _)| spec.clone()).collect();
        out_tx
            .send(WireMessage::Register {
                data: RegisterPayload {
                    name: name.to_string(),
                    version: self.version.clone(),
                    description: self.description.clone(),
                    tools: specs,
                    pid: Some(std::process::id()),
                },
            })
            .context("Hub connection closed before registration")?;

        let ctx = ProviderContext {
            provider: name.to_string(),
            state: Arc::new(Mutex::new(Value::Null)),
            out_tx: out_tx.clone(),
        };

        let handlers: std::collections::HashMap<String, ToolHandler> = self
            .tools
            .into_iter()
            .map(|(spec, handler)| (spec.name, handler))
            .collect();

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break, // Hub closed the socket; exit cleanly.
                Ok(n) => n,
                // A reset while the hub tears down is also a clean exit.
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
                    ) =>
                {
                    break
                }
                Err(e) => return Err(e.into()),
            };
            let frames = decoder
                .feed(&buf[..n])
                .map_err(|e| anyhow::anyhow!("hub sent undecodable data: {e}"))?;
            for frame in frames {
                self::handle_frame(frame, &handlers, &ctx, &self.initialize, &out_tx);
            }
        }

        drop(out_tx);
        let _ = writer.await;
        Ok(())
    }
}

impl std::fmt::Debug for ProviderRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRuntime")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

fn handle_frame(
    frame: WireMessage,
    handlers: &std::collections::HashMap<String, ToolHandler>,
    ctx: &ProviderContext,
    initialize: &Option<InitializeHook>,
    out_tx: &UnboundedSender<WireMessage>,
) {
    match frame {
        WireMessage::ToolCall { id, data } => {
            let Some(handler) = handlers.get(&data.tool_name) else {
                let _ = out_tx.send(WireMessage::response_err(
                    id,
                    format!("unknown tool: {}", data.tool_name),
                ));
                return;
            };

            // Each call runs on its own task so a slow handler never
            // blocks the read loop or other in-flight calls.
            let handler = Arc::clone(handler);
            let ctx = ctx.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || {
                    std::panic::catch_unwind(AssertUnwindSafe(|| handler(&data.params, &ctx)))
                })
                .await;

                let response = match result {
                    Ok(Ok(Ok(value))) => WireMessage::response_ok(id, value),
                    Ok(Ok(Err(reason))) => WireMessage::response_err(id, reason),
                    Ok(Err(panic)) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "handler panicked".to_string());
                        WireMessage::response_err(id, format!("handler panicked: {reason}"))
                    }
                    Err(join_err) => {
                        WireMessage::response_err(id, format!("handler aborted: {join_err}"))
                    }
                };
                let _ = out_tx.send(response);
            });
        }

        WireMessage::Reinitialize { data } => {
            if let Some(hook) = initialize {
                let previous = ctx.state();
                let next = hook(&data, &previous);
                // The hook returns an owned value, so the installed state
                // shares nothing with the caller's copy of the config.
                *ctx.state.lock().expect("provider state lock poisoned") = next;
            }
        }

        other => {
            log::warn!("[Runtime] Unexpected {} frame from hub, ignoring", other.kind());
        }
    }
}

/// Connect to the hub socket, retrying with linear backoff.
async fn connect_with_retries(socket_path: &Path) -> Result<UnixStream> {
    let mut last_err: Option<std::io::Error> = None;
    for attempt in 0..CONNECT_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(CONNECT_RETRY_BASE * attempt).await;
        }
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!(
                    "[Runtime] Connect attempt {}/{CONNECT_RETRIES} failed: {e}",
                    attempt + 1
                );
                last_err = Some(e);
            }
        }
    }
    Err(anyhow::anyhow!(
        "Failed to connect to hub socket after {CONNECT_RETRIES} attempts: {}: {}",
        socket_path.display(),
        last_err.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
    ))
}
