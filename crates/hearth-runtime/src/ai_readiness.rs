//! Readiness gate for the local AI servers (primary model and embeddings).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use hearth_core::config::AiConfig;
use hearth_core::TopologyMode;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::ai_health::{AiServerHealth, AiServerStatus};

pub const LLM_ROLE: &str = "llm";
pub const EMBEDDINGS_ROLE: &str = "embeddings";
const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRoleEndpoint {
    pub base_url: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiReadinessConfig {
    pub llm: AiRoleEndpoint,
    pub embeddings: AiRoleEndpoint,
    /// Interval of the background warm-up pollers.
    pub poll_interval: Duration,
    /// Interval of the blocking readiness wait.
    pub wait_interval: Duration,
}

impl AiReadinessConfig {
    pub fn from_config(config: &AiConfig) -> Self {
        let model = |raw: &str| Some(raw.trim().to_string()).filter(|model| !model.is_empty());
        Self {
            llm: AiRoleEndpoint {
                base_url: config.llm_url.clone(),
                model: model(&config.llm_model),
            },
            embeddings: AiRoleEndpoint {
                base_url: config.embeddings_url.clone(),
                model: model(&config.embeddings_model),
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            wait_interval: DEFAULT_WAIT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiExecutionStatus {
    pub llm: AiServerStatus,
    pub embeddings: AiServerStatus,
}

/// Tracks readiness of the local AI servers for one runtime.
///
/// In remote mode no local servers are expected and the manager is always
/// ready.
pub struct AiExecutionManager {
    mode: TopologyMode,
    config: AiReadinessConfig,
    client: reqwest::Client,
    llm: Option<Arc<AiServerHealth>>,
    embeddings: Option<Arc<AiServerHealth>>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl AiExecutionManager {
    pub fn new(mode: TopologyMode, config: AiReadinessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build ai health http client")?;
        tracing::info!(%mode, "ai execution manager initialized");
        Ok(Self {
            mode,
            config,
            client,
            llm: None,
            embeddings: None,
            pollers: Mutex::new(Vec::new()),
        })
    }

    pub fn mode(&self) -> TopologyMode {
        self.mode
    }

    /// Creates the health trackers and one warm-up poller per role.
    ///
    /// Requires a Tokio runtime. Pollers retry until ready, with no timeout.
    pub fn start(&mut self) -> Result<()> {
        if self.mode == TopologyMode::Remote {
            tracing::info!("remote mode; local ai servers are not expected");
            return Ok(());
        }
        if self.llm.is_some() || self.embeddings.is_some() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .context("ai execution manager requires an active Tokio runtime")?;

        let llm = Arc::new(self.health_for(LLM_ROLE, &self.config.llm));
        let embeddings = Arc::new(self.health_for(EMBEDDINGS_ROLE, &self.config.embeddings));
        let mut pollers = lock_or_recover(&self.pollers);
        for health in [&llm, &embeddings] {
            let health = Arc::clone(health);
            let interval = self.config.poll_interval;
            pollers.push(handle.spawn(async move {
                while !health.check().await {
                    tokio::time::sleep(interval).await;
                }
            }));
        }
        drop(pollers);
        self.llm = Some(llm);
        self.embeddings = Some(embeddings);
        Ok(())
    }

    fn health_for(&self, role: &str, endpoint: &AiRoleEndpoint) -> AiServerHealth {
        tracing::info!(role, url = %endpoint.base_url, "initializing ai health tracker");
        AiServerHealth::new(
            self.client.clone(),
            role,
            &endpoint.base_url,
            endpoint.model.clone(),
        )
    }

    /// Blocks up to roughly `timeout` for both roles.
    ///
    /// Roles are polled concurrently, each with `max(1, timeout / interval)`
    /// probes. A local manager that was never started has no trackers and is
    /// not ready, matching [`Self::is_ready`].
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        if self.mode == TopologyMode::Remote {
            return true;
        }
        let interval = self.config.wait_interval;
        let retries = retries_for(timeout, interval);
        let wait = move |health: Option<Arc<AiServerHealth>>| async move {
            match health {
                Some(health) => health.wait_until_ready(retries, interval).await,
                None => false,
            }
        };
        let (llm_ready, embeddings_ready) =
            tokio::join!(wait(self.llm.clone()), wait(self.embeddings.clone()));
        tracing::info!(llm_ready, embeddings_ready, "ai readiness wait finished");
        llm_ready && embeddings_ready
    }

    pub fn is_ready(&self) -> bool {
        if self.mode == TopologyMode::Remote {
            return true;
        }
        let ready = |health: &Option<Arc<AiServerHealth>>| {
            health.as_ref().is_some_and(|health| health.is_ready())
        };
        ready(&self.llm) && ready(&self.embeddings)
    }

    pub fn status(&self) -> AiExecutionStatus {
        let status = |health: &Option<Arc<AiServerHealth>>| {
            health
                .as_ref()
                .map(|health| health.status())
                .unwrap_or_else(AiServerStatus::off)
        };
        AiExecutionStatus {
            llm: status(&self.llm),
            embeddings: status(&self.embeddings),
        }
    }

    /// Stops the warm-up pollers. Readiness already latched is kept.
    pub fn stop(&self) {
        for poller in lock_or_recover(&self.pollers).drain(..) {
            poller.abort();
        }
    }
}

impl Drop for AiExecutionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn retries_for(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let retries = timeout.as_secs_f64() / interval.as_secs_f64();
    (retries as u32).max(1)
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
