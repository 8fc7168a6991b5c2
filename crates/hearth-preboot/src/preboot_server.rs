//! HTTP surface of the preboot process.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hearth_core::config::DiscoveryConfig;
use hearth_core::{current_unix_timestamp, LaunchContext, TopologyMode};
use hearth_discovery::{
    discover, probe_remote_target, DiscoveredHost, DiscoveryRequest, NodeIdentity,
};
use hearth_policy::{evaluate, FactsProvider};
use hearth_trust::TrustStore;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::TcpListener;

use crate::commit::{CommitError, CommitProtocol};
use crate::context::DispatchPayload;
use crate::orchestrator::PrebootOrchestrator;

mod pairing_handlers;
mod types;

use pairing_handlers::{
    handle_host_pairing_notify, handle_pairing_approve, handle_pairing_list,
    handle_pairing_online, handle_pairing_request, handle_pairing_status,
};
use types::{DecideRequest, DispatchRequest, PrebootApiError, ProbeQuery, SystemVerifyResponse};

pub const HELLO_ENDPOINT: &str = "/preboot/hello";
pub const NETWORK_ENDPOINT: &str = "/preboot/network";
pub const NETWORK_SCAN_ENDPOINT: &str = "/preboot/network/scan";
pub const NETWORK_SCAN_STREAM_ENDPOINT: &str = "/preboot/network/scan/stream";
pub const PAIRING_STATUS_ENDPOINT: &str = "/preboot/pairing/status";
pub const PAIRING_LIST_ENDPOINT: &str = "/preboot/pairing/list";
pub const PAIRING_ONLINE_ENDPOINT: &str = "/preboot/pairing/online";
pub const PAIRING_REQUEST_ENDPOINT: &str = "/preboot/pairing/request";
pub const PAIRING_APPROVE_ENDPOINT: &str = "/preboot/pairing/approve";
pub const STATUS_ENDPOINT: &str = "/preboot/status";
pub const SYSTEM_VERIFY_ENDPOINT: &str = "/preboot/system/verify";
pub const SESSION_ENDPOINT: &str = "/preboot/session";
pub const DECIDE_ENDPOINT: &str = "/preboot/decide";
pub const DISPATCH_ENDPOINT: &str = "/preboot/dispatch";
pub const COMMIT_ENDPOINT: &str = "/preboot/commit";
pub const HOST_PROBE_ENDPOINT: &str = "/host/probe";
pub const HOST_PAIRING_NOTIFY_ENDPOINT: &str = "/host/pairing/notify";

const LAN_SCOPE: &str = "lan";
const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PrebootServerConfig {
    pub bind: SocketAddr,
    pub identity: NodeIdentity,
    pub discovery: DiscoveryConfig,
    /// Port of the peer daemon that receives pairing notifications.
    pub daemon_port: u16,
}

pub struct PrebootServerState {
    config: PrebootServerConfig,
    orchestrator: Mutex<PrebootOrchestrator>,
    launch: Mutex<LaunchContext>,
    commit: CommitProtocol,
    trust: Arc<dyn TrustStore>,
    facts: Arc<dyn FactsProvider>,
    client: reqwest::Client,
}

impl PrebootServerState {
    pub fn new(
        config: PrebootServerConfig,
        launch: LaunchContext,
        commit: CommitProtocol,
        trust: Arc<dyn TrustStore>,
        facts: Arc<dyn FactsProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_CLIENT_TIMEOUT)
            .build()
            .context("failed to build preboot http client")?;
        Ok(Self {
            config,
            orchestrator: Mutex::new(PrebootOrchestrator::new()),
            launch: Mutex::new(launch),
            commit,
            trust,
            facts,
            client,
        })
    }

    pub fn launch_context(&self) -> LaunchContext {
        lock_or_recover(&self.launch).clone()
    }

    pub fn orchestrator(&self) -> MutexGuard<'_, PrebootOrchestrator> {
        lock_or_recover(&self.orchestrator)
    }
}

pub fn build_preboot_router(state: Arc<PrebootServerState>) -> Router {
    Router::new()
        .route(HELLO_ENDPOINT, get(handle_hello))
        .route(NETWORK_ENDPOINT, get(handle_network_identity))
        .route(NETWORK_SCAN_ENDPOINT, get(handle_network_scan))
        .route(NETWORK_SCAN_STREAM_ENDPOINT, get(handle_network_scan_stream))
        .route(PAIRING_STATUS_ENDPOINT, get(handle_pairing_status))
        .route(PAIRING_LIST_ENDPOINT, get(handle_pairing_list))
        .route(PAIRING_ONLINE_ENDPOINT, get(handle_pairing_online))
        .route(PAIRING_REQUEST_ENDPOINT, post(handle_pairing_request))
        .route(PAIRING_APPROVE_ENDPOINT, post(handle_pairing_approve))
        .route(STATUS_ENDPOINT, get(handle_status))
        .route(SYSTEM_VERIFY_ENDPOINT, get(handle_system_verify))
        .route(SESSION_ENDPOINT, get(handle_session))
        .route(DECIDE_ENDPOINT, post(handle_decide))
        .route(DISPATCH_ENDPOINT, post(handle_dispatch))
        .route(COMMIT_ENDPOINT, post(handle_commit))
        .route(HOST_PROBE_ENDPOINT, get(handle_host_probe))
        .route(HOST_PAIRING_NOTIFY_ENDPOINT, post(handle_host_pairing_notify))
        .fallback(handle_not_found)
        .with_state(state)
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_preboot(
    listener: TcpListener,
    state: Arc<PrebootServerState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_preboot_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("preboot server exited unexpectedly")
}

pub async fn run_preboot_server(
    state: Arc<PrebootServerState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let bind = state.config.bind;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind preboot server on {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound preboot server address")?;
    tracing::info!(addr = %local_addr, node_id = %state.config.identity.node_id, "preboot server listening");
    let result = serve_preboot(listener, state, shutdown).await;
    tracing::info!("preboot server stopped");
    result
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Empty bodies decode to the default request.
fn parse_json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, PrebootApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice::<T>(body).map_err(|error| {
        PrebootApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}

fn parse_mode(raw: Option<&str>) -> Result<Option<TopologyMode>, PrebootApiError> {
    match raw {
        None => Ok(None),
        Some(raw) => TopologyMode::parse(raw).map(Some).ok_or_else(|| {
            PrebootApiError::bad_request("invalid_mode", format!("unsupported mode '{raw}'"))
        }),
    }
}

async fn handle_hello() -> Json<serde_json::Value> {
    Json(json!({
        "ice": true,
        "service": "preboot",
        "ts": current_unix_timestamp(),
    }))
}

async fn handle_network_identity(State(state): State<Arc<PrebootServerState>>) -> Response {
    let identity = &state.config.identity;
    (
        StatusCode::OK,
        Json(json!({
            "node_id": identity.node_id,
            "hostname": identity.hostname,
            "ip": identity.ip,
            "preboot_port": identity.preboot_port,
            "daemon_port": identity.daemon_port,
            "role": "host",
        })),
    )
        .into_response()
}

async fn handle_network_scan(State(state): State<Arc<PrebootServerState>>) -> Response {
    tracing::info!("lan scan requested");
    state.orchestrator().context_mut().update(DispatchPayload {
        scope: Some(LAN_SCOPE.to_string()),
        scanning: Some(true),
        ..DispatchPayload::default()
    });

    let identity = &state.config.identity;
    let request = DiscoveryRequest::broadcast(&state.config.discovery)
        .excluding_self(identity.ip.as_deref(), &identity.node_id);
    let started = Instant::now();
    let mut on_host = |host: &DiscoveredHost| {
        state.orchestrator().handle_discovered_host(host.clone());
    };
    let hosts = discover(&request, state.trust.as_ref(), Some(&mut on_host)).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    state.orchestrator().context_mut().update(DispatchPayload {
        scanning: Some(false),
        ..DispatchPayload::default()
    });
    (
        StatusCode::OK,
        Json(json!({
            "hosts": hosts,
            "count": hosts.len(),
            "duration_ms": duration_ms,
            "scope": LAN_SCOPE,
        })),
    )
        .into_response()
}

async fn handle_network_scan_stream() -> Response {
    tracing::info!("lan scan stream endpoint is deprecated");
    (
        StatusCode::GONE,
        Json(json!({"error": "scan_stream_deprecated"})),
    )
        .into_response()
}

async fn handle_status(State(state): State<Arc<PrebootServerState>>) -> Response {
    let status = state.orchestrator().status();
    (StatusCode::OK, Json(status)).into_response()
}

async fn handle_system_verify(State(state): State<Arc<PrebootServerState>>) -> Response {
    tracing::info!("system verify requested");
    let facts_provider = Arc::clone(&state.facts);
    let facts = match tokio::task::spawn_blocking(move || facts_provider.collect()).await {
        Ok(facts) => facts,
        Err(error) => {
            return PrebootApiError::internal(format!("system fact collection failed: {error}"))
                .into_response();
        }
    };
    let policy = evaluate(&facts);
    tracing::info!(status = policy.status.as_str(), "system verify complete");
    (StatusCode::OK, Json(SystemVerifyResponse { facts, policy })).into_response()
}

async fn handle_session(State(state): State<Arc<PrebootServerState>>) -> Response {
    let session_id = state.orchestrator().session_id().to_string();
    let launch = state.launch_context();
    (
        StatusCode::OK,
        Json(json!({
            "session_id": session_id,
            "launch_dir": launch
                .launch_dir
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            "launch_id": launch.launch_id.unwrap_or_default(),
            "phase": launch.phase.map(|phase| phase.as_str()),
        })),
    )
        .into_response()
}

async fn handle_decide(State(state): State<Arc<PrebootServerState>>, body: Bytes) -> Response {
    let request = match parse_json_body::<DecideRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let mode = match parse_mode(request.mode.as_deref()) {
        Ok(Some(mode)) => mode,
        Ok(None) => {
            return PrebootApiError::bad_request("missing_mode", "mode is required")
                .into_response();
        }
        Err(error) => return error.into_response(),
    };

    let mut orchestrator = state.orchestrator();
    let staged = orchestrator.context_mut().stage_decision(
        mode,
        request.host,
        request.resources,
        request.policy,
    );
    match staged {
        Ok(pending) => {
            tracing::info!(mode = %pending.mode, "preboot decided");
            (
                StatusCode::OK,
                Json(json!({
                    "ok": true,
                    "decision": {
                        "mode": pending.mode,
                        "host": pending.host,
                        "resources": pending.resources,
                    },
                })),
            )
                .into_response()
        }
        Err(error) => PrebootApiError::conflict("decision_already_committed", error.to_string())
            .into_response(),
    }
}

async fn handle_dispatch(State(state): State<Arc<PrebootServerState>>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<DispatchRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            return PrebootApiError::bad_request(
                "malformed_json",
                format!("failed to parse request body: {error}"),
            )
            .into_response();
        }
    };
    let mut orchestrator = state.orchestrator();
    let next = orchestrator.dispatch(&request.event, request.payload);
    (
        StatusCode::OK,
        Json(json!({
            "state": next,
            "status": orchestrator.status(),
        })),
    )
        .into_response()
}

async fn handle_commit(State(state): State<Arc<PrebootServerState>>, body: Bytes) -> Response {
    let request = match parse_json_body::<DecideRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let body_mode = match parse_mode(request.mode.as_deref()) {
        Ok(mode) => mode,
        Err(error) => return error.into_response(),
    };

    let mut orchestrator = state.orchestrator();
    let context = orchestrator.context_mut();
    if context.pending().is_none() {
        if let Some(mode) = body_mode {
            if let Err(error) =
                context.stage_decision(mode, request.host, request.resources, None)
            {
                tracing::debug!(%error, "commit body could not stage decision");
            }
        }
    }
    if let Some(policy) = request.policy {
        if let Some(pending) = context
            .pending_mut()
            .as_mut()
            .filter(|pending| !pending.committed)
        {
            pending.policy = policy;
        }
    }

    let mut launch = lock_or_recover(&state.launch);
    match state.commit.commit(context.pending_mut(), &mut launch) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "committed",
                "runtime_dir": outcome.runtime_dir.display().to_string(),
                "runtime_id": outcome.runtime_id,
                "controller_pid": outcome.controller_pid,
                "decision": outcome.decision,
            })),
        )
            .into_response(),
        Err(error) => commit_error_response(&error),
    }
}

fn commit_error_response(error: &CommitError) -> Response {
    if error.is_conflict() {
        tracing::warn!(code = error.code(), "commit rejected: {error}");
    } else {
        tracing::error!(code = error.code(), "commit failed: {error}");
    }
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    PrebootApiError::new(status, error.code(), error.to_string()).into_response()
}

async fn handle_host_probe(
    State(state): State<Arc<PrebootServerState>>,
    Query(query): Query<ProbeQuery>,
) -> Response {
    let Some(target) = query
        .target
        .map(|target| target.trim().to_string())
        .filter(|target| !target.is_empty())
    else {
        return PrebootApiError::bad_request("missing_target", "target is required")
            .into_response();
    };
    let snapshot = state.trust.snapshot().unwrap_or_else(|error| {
        tracing::warn!(%error, "trust snapshot unavailable for host probe");
        Default::default()
    });
    match probe_remote_target(&state.client, &target, &snapshot).await {
        Ok(host) => (StatusCode::OK, Json(json!({ "host": host }))).into_response(),
        Err(error) => PrebootApiError::bad_request("invalid_target", error.to_string()).into_response(),
    }
}

async fn handle_not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "path": uri.path(),
        })),
    )
        .into_response()
}

/// Client ip as seen by the server, used in pairing notifications.
fn client_ip(connect_info: &ConnectInfo<SocketAddr>) -> String {
    connect_info.0.ip().to_string()
}
