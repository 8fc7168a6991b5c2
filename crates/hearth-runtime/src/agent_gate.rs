use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hearth_core::{utc_timestamp_rfc3339, write_text_atomic};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::ai_readiness::{AiExecutionManager, AiExecutionStatus};

pub const AI_READY_FILE_NAME: &str = "ai-ready.json";

/// Work that must not start before the AI servers are ready.
#[async_trait]
pub trait AgentBootstrap: Send + Sync {
    async fn bootstrap(&self, status: &AiExecutionStatus) -> Result<()>;
}

/// Publishes readiness to downstream agents as `<runtime_dir>/ai-ready.json`.
#[derive(Debug, Clone)]
pub struct ReadyMarkerBootstrap {
    path: PathBuf,
    mode: String,
}

impl ReadyMarkerBootstrap {
    pub fn new(runtime_dir: &Path, mode: impl Into<String>) -> Self {
        Self {
            path: runtime_dir.join(AI_READY_FILE_NAME),
            mode: mode.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AgentBootstrap for ReadyMarkerBootstrap {
    async fn bootstrap(&self, status: &AiExecutionStatus) -> Result<()> {
        let marker = json!({
            "ready_at": utc_timestamp_rfc3339(),
            "mode": self.mode,
            "llm": status.llm,
            "embeddings": status.embeddings,
        });
        let rendered =
            serde_json::to_string_pretty(&marker).context("failed to render ai ready marker")?;
        write_text_atomic(&self.path, &rendered)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "ai ready marker written");
        Ok(())
    }
}

#[derive(Debug)]
pub enum AgentGateOutcome {
    /// Bootstrap ran within the foreground wait.
    Ready,
    /// Foreground wait expired; a background waiter resolves to whether the
    /// bootstrap eventually ran.
    Deferred(JoinHandle<bool>),
}

/// Waits `foreground` for readiness and runs `bootstrap` if reached;
/// otherwise hands off to a background waiter bounded by `late`.
pub async fn gate_agent_bootstrap(
    manager: Arc<AiExecutionManager>,
    bootstrap: Arc<dyn AgentBootstrap>,
    foreground: Duration,
    late: Duration,
) -> AgentGateOutcome {
    if manager.wait_until_ready(foreground).await {
        run_bootstrap(&manager, bootstrap.as_ref()).await;
        return AgentGateOutcome::Ready;
    }
    tracing::warn!(
        foreground_ms = foreground.as_millis() as u64,
        "ai servers not ready; deferring agent bootstrap"
    );
    AgentGateOutcome::Deferred(tokio::spawn(async move {
        if manager.wait_until_ready(late).await {
            run_bootstrap(&manager, bootstrap.as_ref()).await;
            true
        } else {
            tracing::warn!(
                late_ms = late.as_millis() as u64,
                "ai servers never became ready; agent bootstrap skipped"
            );
            false
        }
    }))
}

async fn run_bootstrap(manager: &AiExecutionManager, bootstrap: &dyn AgentBootstrap) {
    if let Err(error) = bootstrap.bootstrap(&manager.status()).await {
        tracing::error!(%error, "agent bootstrap failed");
    }
}

#[cfg(test)]
mod tests {
    use hearth_core::TopologyMode;
    use httpmock::prelude::*;
    use serde_json::Value;

    use super::*;
    use crate::ai_readiness::{AiReadinessConfig, AiRoleEndpoint};

    fn config(llm: String, embeddings: String) -> AiReadinessConfig {
        AiReadinessConfig {
            llm: AiRoleEndpoint {
                base_url: llm,
                model: None,
            },
            embeddings: AiRoleEndpoint {
                base_url: embeddings,
                model: None,
            },
            poll_interval: Duration::from_millis(20),
            wait_interval: Duration::from_millis(20),
        }
    }

    fn read_marker(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).expect("marker")).expect("json")
    }

    #[tokio::test]
    async fn functional_remote_mode_bootstraps_in_foreground() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = AiExecutionManager::new(
            TopologyMode::Remote,
            config("http://127.0.0.1:9".into(), "http://127.0.0.1:9".into()),
        )
        .expect("manager");
        let bootstrap = Arc::new(ReadyMarkerBootstrap::new(temp.path(), "remote"));
        let outcome = gate_agent_bootstrap(
            Arc::new(manager),
            bootstrap.clone(),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(outcome, AgentGateOutcome::Ready));
        let marker = read_marker(bootstrap.path());
        assert_eq!(marker["mode"], "remote");
        assert_eq!(marker["llm"]["state"], "off");
    }

    #[tokio::test]
    async fn integration_late_readiness_runs_bootstrap_in_background() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = MockServer::start_async().await;
        let embeddings = MockServer::start_async().await;
        llm.mock_async(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(200).json_body(serde_json::json!({"data": ["m"]}));
        })
        .await;
        let mut manager =
            AiExecutionManager::new(TopologyMode::Local, config(llm.base_url(), embeddings.base_url()))
                .expect("manager");
        manager.start().expect("start");
        let bootstrap = Arc::new(ReadyMarkerBootstrap::new(temp.path(), "local"));

        let outcome = gate_agent_bootstrap(
            Arc::new(manager),
            bootstrap.clone(),
            Duration::from_millis(60),
            Duration::from_secs(3),
        )
        .await;
        let AgentGateOutcome::Deferred(waiter) = outcome else {
            panic!("embeddings are not ready yet; bootstrap must be deferred");
        };
        assert!(!bootstrap.path().exists());

        embeddings
            .mock_async(|when, then| {
                when.method(GET).path("/v1/models");
                then.status(200).json_body(serde_json::json!({"models": ["e"]}));
            })
            .await;
        assert!(waiter.await.expect("join"));
        let marker = read_marker(bootstrap.path());
        assert_eq!(marker["embeddings"]["state"], "ready");
    }

    #[tokio::test]
    async fn regression_never_ready_skips_bootstrap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let unused = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let base = format!("http://{}", unused.local_addr().expect("addr"));
        drop(unused);
        let mut manager =
            AiExecutionManager::new(TopologyMode::Local, config(base.clone(), base)).expect("manager");
        manager.start().expect("start");
        let bootstrap = Arc::new(ReadyMarkerBootstrap::new(temp.path(), "local"));
        let outcome = gate_agent_bootstrap(
            Arc::new(manager),
            bootstrap.clone(),
            Duration::from_millis(20),
            Duration::from_millis(60),
        )
        .await;
        let AgentGateOutcome::Deferred(waiter) = outcome else {
            panic!("expected deferral");
        };
        assert!(!waiter.await.expect("join"));
        assert!(!bootstrap.path().exists());
    }
}
