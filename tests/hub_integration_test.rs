//! End-to-end tests for the provider hub.
//!
//! A `FakeProvider` plays the external-provider side of the wire protocol
//! over a real Unix socket connection, while the supervisor-spawned child
//! is an inert `sh` process, so the full path (spawn, Starting,
//! register, Running, call routing, teardown) is exercised without
//! depending on a script runtime being installed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use toolhub::calls::CallError;
use toolhub::config::{ChangeAnalysis, Config, PerformanceConfig, ProviderEntry};
use toolhub::events::HostEvent;
use toolhub::protocol::{RegisterPayload, ToolSpec, WireMessage};
use toolhub::socket::framing::{encode, FrameDecoder};
use toolhub::{HotReloadCoordinator, ProviderManager, ProviderStatus};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A provider entry whose child is an inert shell sleeper. The test
/// itself performs the socket registration.
fn inert_entry() -> ProviderEntry {
    ProviderEntry {
        kind: "file".to_string(),
        path: "sleep 30".into(),
        runtime: Some("sh".to_string()),
        args: vec!["-c".to_string()],
        config: Value::Null,
        change_analysis: None,
    }
}

fn test_config(tmp: &tempfile::TempDir, providers: &[&str]) -> Config {
    Config {
        providers: providers
            .iter()
            .map(|name| (name.to_string(), inert_entry()))
            .collect(),
        performance: PerformanceConfig {
            provider_registration_timeout: 5_000,
            provider_shutdown_grace: 2_000,
            ..PerformanceConfig::default()
        },
        socket_path: Some(tmp.path().join("hub.sock")),
        ..Config::default()
    }
}

fn tool(name: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: format!("{name} tool"),
        input_schema: json!({"type": "object"}),
        output_schema: None,
    }
}

/// Poll a provider's status until it matches, within 2 seconds.
async fn wait_status(manager: &ProviderManager, name: &str, wanted: ProviderStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if manager.provider_status(name) == Some(wanted) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {name} to reach {wanted}, currently {:?}",
            manager.provider_status(name)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test-side implementation of the provider wire protocol.
struct FakeProvider {
    stream: UnixStream,
    decoder: FrameDecoder,
    queued: std::collections::VecDeque<WireMessage>,
    buf: [u8; 16384],
}

impl FakeProvider {
    async fn connect(socket_path: &std::path::Path) -> Self {
        let stream = UnixStream::connect(socket_path)
            .await
            .expect("connect to hub socket");
        Self {
            stream,
            decoder: FrameDecoder::new(),
            queued: std::collections::VecDeque::new(),
            buf: [0u8; 16384],
        }
    }

    async fn send(&mut self, msg: &WireMessage) {
        self.stream.write_all(&encode(msg)).await.expect("send frame");
    }

    async fn register(&mut self, name: &str, tools: Vec<ToolSpec>) {
        self.send(&WireMessage::Register {
            data: RegisterPayload {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                description: format!("{name} fake provider"),
                tools,
                pid: Some(std::process::id()),
            },
        })
        .await;
    }

    /// Next frame, or `None` once the hub closed the connection.
    async fn recv_opt(&mut self) -> Option<WireMessage> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Some(frame);
            }
            let read = tokio::time::timeout(
                Duration::from_secs(5),
                self.stream.read(&mut self.buf),
            )
            .await
            .expect("Timed out waiting for frame");
            match read {
                Ok(0) | Err(_) => return None,
                Ok(n) => self
                    .queued
                    .extend(self.decoder.feed(&self.buf[..n]).expect("decode")),
            }
        }
    }

    async fn recv(&mut self) -> WireMessage {
        self.recv_opt().await.expect("hub closed the connection")
    }
}

/// Start `name` and complete its registration from a fake provider.
async fn start_registered(
    manager: &Arc<ProviderManager>,
    name: &str,
    tools: Vec<ToolSpec>,
) -> FakeProvider {
    let start = {
        let manager = Arc::clone(manager);
        let name = name.to_string();
        tokio::spawn(async move { manager.start_provider(&name).await })
    };

    wait_status(manager, name, ProviderStatus::Starting).await;
    let mut provider = FakeProvider::connect(&manager.socket_path()).await;
    provider.register(name, tools).await;

    start
        .await
        .expect("start task panicked")
        .expect("start_provider should succeed");
    assert_eq!(manager.provider_status(name), Some(ProviderStatus::Running));
    provider
}

/// Serve `add` calls (and reject everything else) until disconnect.
fn spawn_adder(mut provider: FakeProvider) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = provider.recv_opt().await {
            if let WireMessage::ToolCall { id, data } = frame {
                let response = if data.tool_name == "add" {
                    let a = data.params["a"].as_f64().unwrap_or(f64::NAN);
                    let b = data.params["b"].as_f64().unwrap_or(f64::NAN);
                    WireMessage::response_ok(id, json!({"result": a + b}))
                } else {
                    WireMessage::response_err(id, format!("unknown tool: {}", data.tool_name))
                };
                provider.send(&response).await;
            }
        }
    })
}

/// Drain every event currently queued on the receiver.
fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Round-trip and routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_round_trip_call() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["calc"])).unwrap());

    let provider = start_registered(&manager, "calc", vec![tool("add")]).await;
    let responder = spawn_adder(provider);

    let result = manager
        .call_tool("add", json!({"a": 5, "b": 3}))
        .await
        .expect("call should succeed");
    assert_eq!(result, json!({"result": 8.0}));

    manager.shutdown().await;
    responder.abort();
}

#[tokio::test]
async fn test_unknown_tool() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["calc"])).unwrap());

    let provider = start_registered(&manager, "calc", vec![tool("add")]).await;
    let responder = spawn_adder(provider);

    let err = manager.call_tool("divide", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "ToolNotFound");

    manager.shutdown().await;
    responder.abort();
}

#[tokio::test]
async fn test_concurrent_calls_on_one_connection() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["calc"])).unwrap());

    let provider = start_registered(&manager, "calc", vec![tool("add")]).await;
    let responder = spawn_adder(provider);

    let calls: Vec<_> = (0..10)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .call_tool("add", json!({"a": i, "b": 1}))
                    .await
                    .expect("call should succeed")
            })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let result = call.await.unwrap();
        assert_eq!(result, json!({"result": (i as f64) + 1.0}));
    }

    manager.shutdown().await;
    responder.abort();
}

// ---------------------------------------------------------------------------
// Registration edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tool_name_collision_stops_second_provider() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["p1", "p2"])).unwrap());

    let _p1 = start_registered(&manager, "p1", vec![tool("x")]).await;

    // p2 declares a colliding set: registration must fail
    let start = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start_provider("p2").await })
    };
    wait_status(&manager, "p2", ProviderStatus::Starting).await;
    let mut p2 = FakeProvider::connect(&manager.socket_path()).await;
    p2.register("p2", vec![tool("x"), tool("y")]).await;

    let result = start.await.unwrap();
    assert!(result.is_err(), "p2 start must fail on collision");
    assert_eq!(manager.provider_status("p2"), Some(ProviderStatus::Stopped));

    // Registry contains exactly {x -> p1}
    let tools = manager.list_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].spec.name, "x");
    assert_eq!(tools[0].provider, "p1");

    // The hub dropped p2's connection
    assert!(p2.recv_opt().await.is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_register_with_unrecognized_name_closes_connection() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["calc"])).unwrap());

    let mut ghost = FakeProvider::connect(&manager.socket_path()).await;
    ghost.register("ghost", vec![tool("t")]).await;
    assert!(
        ghost.recv_opt().await.is_none(),
        "connection must close on unrecognized provider name"
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_traffic_before_register_closes_connection() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["calc"])).unwrap());

    let mut rogue = FakeProvider::connect(&manager.socket_path()).await;
    rogue
        .send(&WireMessage::response_ok("c0", json!({})))
        .await;
    assert!(
        rogue.recv_opt().await.is_none(),
        "non-register traffic before binding must close the connection"
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_registration_deadline_fails_provider() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = test_config(&tmp, &["mute"]);
    config.performance.provider_registration_timeout = 300;
    let manager = Arc::new(ProviderManager::start(config).unwrap());
    let mut events = manager.subscribe();

    // Nobody registers on the socket
    let err = manager.start_provider("mute").await.unwrap_err();
    assert!(err.to_string().contains("register"), "got: {err:#}");
    assert_eq!(manager.provider_status("mute"), Some(ProviderStatus::Stopped));

    let failed = drain_events(&mut events)
        .into_iter()
        .any(|e| matches!(e, HostEvent::ProviderFailed { provider, .. } if provider == "mute"));
    assert!(failed, "provider-failed must be emitted");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_initial_config_delivered_after_registration() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = test_config(&tmp, &["cfg"]);
    config.providers.get_mut("cfg").unwrap().config = json!({"precision": 2});
    let manager = Arc::new(ProviderManager::start(config).unwrap());

    let mut provider = start_registered(&manager, "cfg", vec![tool("t")]).await;

    match provider.recv().await {
        WireMessage::Reinitialize { data } => assert_eq!(data, json!({"precision": 2})),
        other => panic!("Expected Reinitialize, got: {other:?}"),
    }

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Timeouts and failure containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_call_timeout_and_late_response_discarded() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = test_config(&tmp, &["slow"]);
    config.performance.tool_call_timeout = 1_000;
    let manager = Arc::new(ProviderManager::start(config).unwrap());

    let mut provider = start_registered(&manager, "slow", vec![tool("nap")]).await;

    let started = std::time::Instant::now();
    let call = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.call_tool("nap", json!({})).await })
    };

    // Provider receives the call but sits on it past the deadline
    let call_id = match provider.recv().await {
        WireMessage::ToolCall { id, .. } => id,
        other => panic!("Expected ToolCall, got: {other:?}"),
    };

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::Timeout);
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(800) && elapsed <= Duration::from_millis(1500),
        "timeout should fire near the 1s deadline, took {elapsed:?}"
    );

    // The slow response eventually arrives and is silently discarded
    provider
        .send(&WireMessage::response_ok(call_id, json!({"late": true})))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.provider_status("slow"), Some(ProviderStatus::Running));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_provider_crash_fails_pending_call() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["p"])).unwrap());

    let mut provider = start_registered(&manager, "p", vec![tool("t1")]).await;
    let mut events = manager.subscribe();

    let call = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.call_tool("t1", json!({})).await })
    };

    // Wait for the call to land, then crash the provider
    match provider.recv().await {
        WireMessage::ToolCall { .. } => {}
        other => panic!("Expected ToolCall, got: {other:?}"),
    }
    drop(provider);

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::ProviderDisconnected("p".to_string()));
    assert_eq!(err.kind(), "ProviderDisconnected");

    wait_status(&manager, "p", ProviderStatus::Stopped).await;
    assert!(manager.list_tools().is_empty());

    // tool-unregistered for t1 exactly once
    tokio::time::sleep(Duration::from_millis(100)).await;
    let unregistered = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, HostEvent::ToolUnregistered { tool, .. } if tool == "t1"))
        .count();
    assert_eq!(unregistered, 1, "t1 must be unregistered exactly once");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_crash_does_not_affect_other_providers() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["calc", "doomed"])).unwrap());

    let calc = start_registered(&manager, "calc", vec![tool("add")]).await;
    let responder = spawn_adder(calc);
    let doomed = start_registered(&manager, "doomed", vec![tool("t")]).await;

    drop(doomed);
    wait_status(&manager, "doomed", ProviderStatus::Stopped).await;

    // calc is untouched
    let result = manager
        .call_tool("add", json!({"a": 2, "b": 2}))
        .await
        .expect("calc must survive doomed's crash");
    assert_eq!(result, json!({"result": 4.0}));

    manager.shutdown().await;
    responder.abort();
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reload_swaps_tool_sets_atomically() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["flip"])).unwrap());

    let _old_conn = start_registered(&manager, "flip", vec![tool("a"), tool("b")]).await;

    // Probe list_tools at high frequency during the swap
    let probing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let probe = {
        let manager = Arc::clone(&manager);
        let probing = Arc::clone(&probing);
        tokio::spawn(async move {
            let mut snapshots: Vec<BTreeSet<String>> = Vec::new();
            while probing.load(std::sync::atomic::Ordering::Relaxed) {
                let names: BTreeSet<String> = manager
                    .list_tools()
                    .into_iter()
                    .map(|t| t.spec.name)
                    .collect();
                snapshots.push(names);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            snapshots
        })
    };

    let reload = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.reload_provider("flip").await })
    };

    // The replacement child registers the new set
    wait_status(&manager, "flip", ProviderStatus::Starting).await;
    let mut new_conn = FakeProvider::connect(&manager.socket_path()).await;
    new_conn.register("flip", vec![tool("a"), tool("c")]).await;

    reload.await.unwrap().expect("reload should succeed");
    assert_eq!(manager.provider_status("flip"), Some(ProviderStatus::Running));

    probing.store(false, std::sync::atomic::Ordering::Relaxed);
    let snapshots = probe.await.unwrap();

    let old: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
    let new: BTreeSet<String> = ["a", "c"].iter().map(|s| s.to_string()).collect();
    for snapshot in &snapshots {
        assert!(
            *snapshot == old || *snapshot == new || snapshot.is_empty(),
            "observed a partial tool set during reload: {snapshot:?}"
        );
    }
    // The final state is the new set
    let final_set: BTreeSet<String> = manager
        .list_tools()
        .into_iter()
        .map(|t| t.spec.name)
        .collect();
    assert_eq!(final_set, new);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_calls_during_reload_fail_fast() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["flip"])).unwrap());

    let _conn = start_registered(&manager, "flip", vec![tool("a")]).await;

    let reload = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.reload_provider("flip").await })
    };

    // Mid-reload the tool set is cleared, but callers still learn the
    // real reason instead of ToolNotFound.
    wait_status(&manager, "flip", ProviderStatus::Starting).await;
    let err = manager.call_tool("a", json!({})).await.unwrap_err();
    assert_eq!(err, CallError::ProviderReloading("flip".to_string()));
    assert_eq!(err.kind(), "ProviderReloading");

    let mut new_conn = FakeProvider::connect(&manager.socket_path()).await;
    new_conn.register("flip", vec![tool("a")]).await;
    reload.await.unwrap().expect("reload should succeed");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_reinitialize_delivers_new_config() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["cfg"])).unwrap());

    let mut provider = start_registered(&manager, "cfg", vec![tool("t")]).await;

    manager
        .reinitialize_provider("cfg", json!({"endpoint": "https://example.com"}))
        .expect("reinitialize should succeed");

    match provider.recv().await {
        WireMessage::Reinitialize { data } => {
            assert_eq!(data, json!({"endpoint": "https://example.com"}));
        }
        other => panic!("Expected Reinitialize, got: {other:?}"),
    }
    assert_eq!(manager.provider_status("cfg"), Some(ProviderStatus::Running));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_stop_provider_is_terminal() {
    let tmp = tempfile::TempDir::new().unwrap();
    let manager = Arc::new(ProviderManager::start(test_config(&tmp, &["p"])).unwrap());
    let mut events = manager.subscribe();

    let mut provider = start_registered(&manager, "p", vec![tool("t")]).await;

    manager.stop_provider("p").await;
    assert_eq!(manager.provider_status("p"), Some(ProviderStatus::Stopped));
    assert!(manager.list_tools().is_empty());
    assert!(provider.recv_opt().await.is_none(), "connection must close");

    let disconnected = drain_events(&mut events).into_iter().any(
        |e| matches!(e, HostEvent::ProviderDisconnected { provider, .. } if provider == "p"),
    );
    assert!(disconnected, "provider-disconnected must be emitted");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_config_change_reinitializes_via_coordinator() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = test_config(&tmp, &["cfg"]);
    config.dev.hot_reload = true;
    {
        let entry = config.providers.get_mut("cfg").unwrap();
        entry.config = json!({"precision": 1});
        entry.change_analysis = Some(ChangeAnalysis {
            restart_triggers: vec!["endpoint".to_string()],
            reinit_triggers: vec!["precision".to_string()],
        });
    }

    let manager = Arc::new(ProviderManager::start(config.clone()).unwrap());
    let coordinator = HotReloadCoordinator::start(Arc::clone(&manager), &config)
        .unwrap()
        .expect("hot reload is enabled");

    let mut provider = start_registered(&manager, "cfg", vec![tool("t")]).await;

    // First reinitialize frame carries the startup config
    match provider.recv().await {
        WireMessage::Reinitialize { data } => assert_eq!(data, json!({"precision": 1})),
        other => panic!("Expected Reinitialize, got: {other:?}"),
    }

    // A reinit-trigger change flows through without a restart
    let mut new_config = config.clone();
    new_config.providers.get_mut("cfg").unwrap().config = json!({"precision": 3});
    coordinator.update_config(new_config).await;

    match provider.recv().await {
        WireMessage::Reinitialize { data } => assert_eq!(data, json!({"precision": 3})),
        other => panic!("Expected Reinitialize, got: {other:?}"),
    }
    assert_eq!(manager.provider_status("cfg"), Some(ProviderStatus::Running));

    coordinator.shutdown();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_source_change_restarts_provider() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("provider.py");
    std::fs::write(&source, "# v1\n").unwrap();

    let mut config = test_config(&tmp, &[]);
    config.dev.hot_reload = true;
    config.providers.insert(
        "watched".to_string(),
        ProviderEntry {
            kind: "file".to_string(),
            path: source.clone(),
            // The inert sleeper again; the entry path rides along as $0.
            runtime: Some("sh".to_string()),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            config: Value::Null,
            change_analysis: None,
        },
    );

    let manager = Arc::new(ProviderManager::start(config.clone()).unwrap());
    let coordinator = HotReloadCoordinator::start(Arc::clone(&manager), &config)
        .unwrap()
        .expect("hot reload is enabled");

    let old_conn = start_registered(&manager, "watched", vec![tool("old")]).await;

    // Editing the source must restart the provider
    std::fs::write(&source, "# v2\n").unwrap();

    wait_status(&manager, "watched", ProviderStatus::Starting).await;
    drop(old_conn);

    let mut new_conn = FakeProvider::connect(&manager.socket_path()).await;
    new_conn.register("watched", vec![tool("new")]).await;
    wait_status(&manager, "watched", ProviderStatus::Running).await;

    let names: Vec<String> = manager
        .list_tools()
        .into_iter()
        .map(|t| t.spec.name)
        .collect();
    assert_eq!(names, vec!["new"]);

    coordinator.shutdown();
    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_unlinks_socket_and_fails_calls() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp, &["p"]);
    let socket_path = config.socket_path.clone().unwrap();
    let manager = Arc::new(ProviderManager::start(config).unwrap());

    let mut provider = start_registered(&manager, "p", vec![tool("t")]).await;

    let call = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.call_tool("t", json!({})).await })
    };
    match provider.recv().await {
        WireMessage::ToolCall { .. } => {}
        other => panic!("Expected ToolCall, got: {other:?}"),
    }

    manager.shutdown().await;

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::HostShutdown);
    assert!(!socket_path.exists(), "socket file must be unlinked");
    assert!(manager.list_tools().is_empty());
}
