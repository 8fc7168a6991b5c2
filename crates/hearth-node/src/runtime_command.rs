use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use hearth_core::{HearthConfig, LaunchContext};
use hearth_runtime::{
    gate_agent_bootstrap, AgentGateOutcome, AiExecutionManager, AiReadinessConfig,
    ReadyMarkerBootstrap, RuntimeController, RuntimeControllerConfig,
};

use crate::bootstrap_helpers::shutdown_signal;

/// Runs until SIGINT/SIGTERM. Any startup failure, including a held runtime
/// lock, is returned so the process exits non-zero.
pub(crate) async fn run_runtime_controller(config: HearthConfig) -> Result<()> {
    let context = LaunchContext::from_env();
    let mut controller =
        RuntimeController::new(context, RuntimeControllerConfig::from_config(&config));
    if let Err(error) = controller.start() {
        tracing::error!(code = error.code(), %error, "runtime controller failed to start");
        controller.shutdown();
        return Err(anyhow!(error).context("runtime controller start failed"));
    }

    let (mode, runtime_dir) = match (controller.decision(), controller.runtime_dir()) {
        (Some(decision), Some(runtime_dir)) => (decision.mode, runtime_dir.to_path_buf()),
        _ => {
            controller.shutdown();
            return Err(anyhow!("runtime controller is running without a decision"));
        }
    };

    let mut ai = AiExecutionManager::new(mode, AiReadinessConfig::from_config(&config.ai))?;
    ai.start().context("failed to start ai readiness pollers")?;
    let ai = Arc::new(ai);
    let bootstrap = Arc::new(ReadyMarkerBootstrap::new(&runtime_dir, mode.as_str()));
    let foreground = Duration::from_secs(config.ai.ready_timeout_secs);
    let late = Duration::from_secs(config.ai.late_ready_timeout_secs);
    let gate = tokio::spawn({
        let ai = Arc::clone(&ai);
        async move {
            match gate_agent_bootstrap(ai, bootstrap, foreground, late).await {
                AgentGateOutcome::Ready => tracing::info!("agent bootstrap completed"),
                AgentGateOutcome::Deferred(waiter) => {
                    let ran = waiter.await.unwrap_or(false);
                    tracing::info!(ran, "deferred agent bootstrap finished");
                }
            }
        }
    });

    tracing::info!(runtime_dir = %runtime_dir.display(), "runtime running; waiting for shutdown signal");
    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    gate.abort();
    ai.stop();
    controller.shutdown();
    Ok(())
}
