use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hearth_core::{DecisionHost, DecisionPolicy, DecisionResources};
use hearth_policy::{PolicyEvaluation, SystemFacts};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::DispatchPayload;

/// Flat `{error, detail}` envelope returned by every failing preboot endpoint.
#[derive(Debug)]
pub(super) struct PrebootApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl PrebootApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for PrebootApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.code,
                "detail": self.message,
            })),
        )
            .into_response()
    }
}

/// Body of `/preboot/decide`; `/preboot/commit` accepts the same shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct DecideRequest {
    pub(super) mode: Option<String>,
    pub(super) host: Option<DecisionHost>,
    pub(super) resources: Option<DecisionResources>,
    pub(super) policy: Option<DecisionPolicy>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DispatchRequest {
    pub(super) event: String,
    #[serde(default)]
    pub(super) payload: DispatchPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct PairingRequestBody {
    pub(super) host_id: Option<String>,
    pub(super) ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct PairingApproveBody {
    pub(super) request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct PairingNotifyBody {
    pub(super) ip: Option<String>,
    pub(super) host_id: Option<String>,
    pub(super) request_id: Option<String>,
}

/// Payload forwarded to a peer daemon's pairing prompt.
#[derive(Debug, Clone, Serialize)]
pub(super) struct PairingNotification {
    pub(super) host_id: String,
    pub(super) request_id: String,
    pub(super) message: &'static str,
    pub(super) client_ip: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct HostIdQuery {
    pub(super) host_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct ProbeQuery {
    pub(super) target: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(super) struct SystemVerifyResponse {
    #[serde(flatten)]
    pub(super) facts: SystemFacts,
    pub(super) policy: PolicyEvaluation,
}
