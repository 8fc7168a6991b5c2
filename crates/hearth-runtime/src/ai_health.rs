use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

pub const MODELS_PATH: &str = "/v1/models";
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Off,
    Starting,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiServerStatus {
    pub state: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub running: bool,
}

impl AiServerStatus {
    pub fn off() -> Self {
        Self {
            state: HealthState::Off,
            url: None,
            model: None,
            running: false,
        }
    }
}

/// Readiness of one OpenAI-compatible server role.
///
/// `ready` is a one-way latch: once a probe lists models it stays set even
/// if later probes fail.
#[derive(Debug)]
pub struct AiServerHealth {
    role: String,
    base_url: String,
    model: Option<String>,
    ready: AtomicBool,
    client: reqwest::Client,
}

impl AiServerHealth {
    /// `base_url` may carry a trailing `/v1`; it is stripped.
    pub fn new(
        client: reqwest::Client,
        role: impl Into<String>,
        base_url: &str,
        model: Option<String>,
    ) -> Self {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string();
        Self {
            role: role.into(),
            base_url,
            model,
            ready: AtomicBool::new(false),
            client,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Probes the model listing once; true when it is non-empty.
    pub async fn check(&self) -> bool {
        let url = format!("{}{MODELS_PATH}", self.base_url);
        let response = match self
            .client
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::trace!(role = %self.role, %error, "ai health probe failed");
                return false;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            return false;
        }
        let Ok(payload) = response.json::<Value>().await else {
            return false;
        };
        if !lists_models(&payload) {
            return false;
        }
        self.mark_ready();
        true
    }

    fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            tracing::info!(
                role = %self.role,
                url = %format!("{}/v1", self.base_url),
                model = self.model.as_deref().unwrap_or("<unset>"),
                "ai server ready"
            );
        }
    }

    /// Up to `retries` probes, sleeping `interval` after each miss.
    pub async fn wait_until_ready(&self, retries: u32, interval: Duration) -> bool {
        for _ in 0..retries {
            if self.check().await {
                return true;
            }
            tokio::time::sleep(interval).await;
        }
        false
    }

    pub fn status(&self) -> AiServerStatus {
        let ready = self.is_ready();
        AiServerStatus {
            state: if ready {
                HealthState::Ready
            } else {
                HealthState::Starting
            },
            url: Some(format!("{}/v1", self.base_url)),
            model: self.model.clone(),
            running: ready,
        }
    }
}

fn lists_models(payload: &Value) -> bool {
    ["data", "models"].iter().any(|key| {
        payload
            .get(key)
            .and_then(Value::as_array)
            .is_some_and(|models| !models.is_empty())
    })
}
