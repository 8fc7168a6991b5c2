use std::{
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use hearth_core::config::DiscoveryConfig;
use hearth_core::launch_context::DECISION_FILE_NAME;
use hearth_core::{
    BootstrapResult, EventLog, ExecutionPhase, LaunchContext, LogRotationPolicy, TopologyMode,
};
use hearth_discovery::NodeIdentity;
use hearth_policy::{FactsProvider, SystemFacts};
use hearth_preboot::{
    serve_preboot, CommitProtocol, ControllerLauncher, PrebootServerConfig, PrebootServerState,
};
use hearth_runtime::{
    ChildCommand, RuntimeController, RuntimeControllerConfig, RuntimeState,
    RUNTIME_LOCK_FILE_NAME,
};
use hearth_trust::{FileTrustStore, TrustStore};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Hands the committed launch context back to the test instead of spawning a
/// controller process.
#[derive(Default)]
struct CapturingLauncher {
    launched: Mutex<Option<LaunchContext>>,
}

impl CapturingLauncher {
    fn take(&self) -> LaunchContext {
        self.launched
            .lock()
            .expect("launcher lock")
            .take()
            .expect("controller launched")
    }
}

impl ControllerLauncher for CapturingLauncher {
    fn launch(&self, context: &LaunchContext) -> BootstrapResult<u32> {
        *self.launched.lock().expect("launcher lock") = Some(context.clone());
        Ok(std::process::id())
    }
}

struct Preboot {
    base: String,
    client: reqwest::Client,
    launcher: Arc<CapturingLauncher>,
    _shutdown: oneshot::Sender<()>,
}

impl Preboot {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = response.status().as_u16();
        (status, response.json::<Value>().await.expect("json body"))
    }
}

async fn start_preboot(root: &Path) -> Preboot {
    let launch_dir = root.join("logs/launches/launch-it");
    std::fs::create_dir_all(&launch_dir).expect("launch dir");
    let launcher = Arc::new(CapturingLauncher::default());
    let config = PrebootServerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        identity: NodeIdentity {
            node_id: "node-it".to_string(),
            hostname: "it-host".to_string(),
            ip: Some("127.0.0.1".to_string()),
            preboot_port: 0,
            daemon_port: 0,
        },
        discovery: DiscoveryConfig::default(),
        daemon_port: 9,
    };
    let trust: Arc<dyn TrustStore> = Arc::new(FileTrustStore::new(root.join("trust")));
    let facts: Arc<dyn FactsProvider> = Arc::new(SystemFacts::default());
    let state = Arc::new(
        PrebootServerState::new(
            config,
            LaunchContext::for_preboot(&launch_dir, "launch-it"),
            CommitProtocol::new(launcher.clone()),
            trust,
            facts,
        )
        .expect("state"),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = serve_preboot(listener, state, async move {
            let _ = shutdown_rx.await;
        })
        .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    Preboot {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        launcher,
        _shutdown: shutdown_tx,
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn controller_config() -> RuntimeControllerConfig {
    RuntimeControllerConfig {
        backend: ChildCommand::new("sleep").with_args(["30"]),
        backend_port: free_port(),
        ai_launcher: ChildCommand::new("sleep").with_args(["30"]),
        ai_role: "local".to_string(),
        log_policy: LogRotationPolicy::default(),
    }
}

fn events(runtime_dir: &Path) -> Vec<String> {
    EventLog::in_runtime_dir(runtime_dir, LogRotationPolicy::default())
        .read_records()
        .into_iter()
        .map(|record| match record["event"].as_str() {
            Some("lifecycle_transition") => record["details"]["to"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            _ => record["event"].as_str().unwrap_or_default().to_string(),
        })
        .collect()
}

#[tokio::test]
async fn integration_local_commit_drives_controller_to_running_and_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let preboot = start_preboot(temp.path()).await;

    let (status, body) = preboot
        .post("/preboot/decide", json!({"mode": "local"}))
        .await;
    assert_eq!(status, 200, "{body}");
    let (status, body) = preboot.post("/preboot/commit", json!({})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "committed");

    let context = preboot.launcher.take();
    assert_eq!(context.phase, Some(ExecutionPhase::Runtime));
    let runtime_dir = context.validate_runtime().expect("runtime markers");
    assert_eq!(body["runtime_dir"], runtime_dir.display().to_string());
    let decision: Value = serde_json::from_str(
        &std::fs::read_to_string(runtime_dir.join(DECISION_FILE_NAME)).expect("decision"),
    )
    .expect("decision json");
    assert_eq!(decision["mode"], "local");
    assert_eq!(decision["version"], 1);

    let mut controller = RuntimeController::new(context, controller_config());
    controller.start().expect("controller start");
    assert_eq!(controller.state(), RuntimeState::Running);
    assert_eq!(controller.decision().map(|d| d.mode), Some(TopologyMode::Local));
    assert!(runtime_dir.join(RUNTIME_LOCK_FILE_NAME).is_file());
    assert!(runtime_dir.join("llm/local-lifecycle.log").is_file());

    controller.shutdown();
    assert_eq!(controller.state(), RuntimeState::Shutdown);
    assert!(!runtime_dir.join(RUNTIME_LOCK_FILE_NAME).exists());
    assert_eq!(
        events(&runtime_dir),
        vec![
            "decision_committed",
            "runtime_lock_acquired",
            "TOPOLOGY_LOADED",
            "POLICY_VALIDATED",
            "BACKEND_STARTED",
            "AI_STARTED",
            "RUNNING",
            "SHUTDOWN",
        ]
    );

    let (status, body) = preboot.post("/preboot/commit", json!({})).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "already_initialized");
}

#[tokio::test]
async fn integration_remote_commit_leaves_controller_without_local_components() {
    let temp = tempfile::tempdir().expect("tempdir");
    let preboot = start_preboot(temp.path()).await;

    let (status, body) = preboot
        .post(
            "/preboot/commit",
            json!({"mode": "remote", "host": "192.168.1.20"}),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["decision"]["host"]["ip"], "192.168.1.20");

    let context = preboot.launcher.take();
    let runtime_dir = context.validate_runtime().expect("runtime markers");
    let mut controller = RuntimeController::new(context, controller_config());
    let error = controller.start().expect_err("no local components");
    assert_eq!(error.code(), "lifecycle_error");
    assert!(controller.child_pids().is_empty());
    drop(controller);

    let recorded = events(&runtime_dir);
    assert_eq!(recorded.first().map(String::as_str), Some("decision_committed"));
    assert!(recorded.iter().any(|event| event == "POLICY_VALIDATED"));
    assert_eq!(recorded.last().map(String::as_str), Some("SHUTDOWN"));
    assert!(!runtime_dir.join(RUNTIME_LOCK_FILE_NAME).exists());
}

#[tokio::test]
async fn regression_commit_without_decision_never_launches_controller() {
    let temp = tempfile::tempdir().expect("tempdir");
    let preboot = start_preboot(temp.path()).await;

    let (status, body) = preboot.post("/preboot/commit", json!({})).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "nothing_to_commit");
    assert!(preboot.launcher.launched.lock().expect("lock").is_none());
    assert!(!temp
        .path()
        .join("logs/launches/launch-it/runtime")
        .exists());
}
