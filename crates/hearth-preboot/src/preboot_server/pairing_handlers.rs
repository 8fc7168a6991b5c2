use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hearth_discovery::trusted_hosts_online;
use serde_json::json;

use super::types::{
    HostIdQuery, PairingApproveBody, PairingNotification, PairingNotifyBody, PairingRequestBody,
    PrebootApiError,
};
use super::{client_ip, parse_json_body, PrebootServerState};

const DAEMON_PAIRING_PATH: &str = "/daemon/ui/pairing";
const PAIRING_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);
const PAIRING_NOTIFY_MESSAGE: &str = "Pairing request pending approval";

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(super) async fn handle_pairing_status(
    State(state): State<Arc<PrebootServerState>>,
    Query(query): Query<HostIdQuery>,
) -> Response {
    let host_id = query.host_id.unwrap_or_default();
    match state.trust.pairing_status(&host_id) {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(error) => {
            PrebootApiError::internal(format!("failed to read pairing status: {error}"))
                .into_response()
        }
    }
}

pub(super) async fn handle_pairing_list(State(state): State<Arc<PrebootServerState>>) -> Response {
    match state.trust.pairings() {
        Ok(pairings) => (StatusCode::OK, Json(json!({ "pairings": pairings }))).into_response(),
        Err(error) => {
            PrebootApiError::internal(format!("failed to read pairings: {error}")).into_response()
        }
    }
}

pub(super) async fn handle_pairing_online(
    State(state): State<Arc<PrebootServerState>>,
) -> Response {
    let hosts = trusted_hosts_online(state.trust.as_ref()).await;
    (StatusCode::OK, Json(json!({ "hosts": hosts }))).into_response()
}

pub(super) async fn handle_pairing_request(
    State(state): State<Arc<PrebootServerState>>,
    body: Bytes,
) -> Response {
    let request = match parse_json_body::<PairingRequestBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let ip = non_blank(request.ip);
    let Some(host_id) = non_blank(request.host_id).or_else(|| ip.clone()) else {
        return PrebootApiError::bad_request("missing_host_id", "host_id or ip is required")
            .into_response();
    };
    match state.trust.create_pairing_request(&host_id, ip.as_deref()) {
        Ok(pairing) => {
            tracing::info!(host_id = %pairing.host_id, request_id = %pairing.request_id, "pairing requested");
            (StatusCode::OK, Json(pairing)).into_response()
        }
        Err(error) => {
            PrebootApiError::internal(format!("failed to create pairing request: {error}"))
                .into_response()
        }
    }
}

pub(super) async fn handle_pairing_approve(
    State(state): State<Arc<PrebootServerState>>,
    body: Bytes,
) -> Response {
    let request = match parse_json_body::<PairingApproveBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let Some(request_id) = non_blank(request.request_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "missing_request_id"})),
        )
            .into_response();
    };
    match state.trust.approve_pairing(&request_id) {
        Ok(ok) => {
            tracing::info!(%request_id, approved = ok, "pairing approval processed");
            (StatusCode::OK, Json(json!({ "ok": ok }))).into_response()
        }
        Err(error) => {
            PrebootApiError::internal(format!("failed to approve pairing: {error}"))
                .into_response()
        }
    }
}

pub(super) async fn handle_host_pairing_notify(
    State(state): State<Arc<PrebootServerState>>,
    connect_info: ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let request = match parse_json_body::<PairingNotifyBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let Some(ip) = non_blank(request.ip) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing_ip"}))).into_response();
    };
    let Some(request_id) = non_blank(request.request_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing_request_id"})),
        )
            .into_response();
    };
    let notification = PairingNotification {
        host_id: non_blank(request.host_id).unwrap_or_else(|| ip.clone()),
        request_id,
        message: PAIRING_NOTIFY_MESSAGE,
        client_ip: client_ip(&connect_info),
    };

    let url = format!(
        "http://{ip}:{}{DAEMON_PAIRING_PATH}",
        state.config.daemon_port
    );
    let result = state
        .client
        .post(&url)
        .timeout(PAIRING_NOTIFY_TIMEOUT)
        .json(&notification)
        .send()
        .await;
    match result {
        Ok(response) => {
            let ok = response.status() == reqwest::StatusCode::OK;
            tracing::info!(%url, ok, "pairing notification forwarded");
            (StatusCode::OK, Json(json!({ "ok": ok }))).into_response()
        }
        Err(error) => {
            tracing::error!(%url, %error, "host pairing notify failed");
            (
                StatusCode::OK,
                Json(json!({"ok": false, "detail": error.to_string()})),
            )
                .into_response()
        }
    }
}
