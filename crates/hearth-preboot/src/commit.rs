//! Exactly-once persistence of the preboot decision and handoff to the
//! runtime controller process.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::Context;
use hearth_core::atomic_io::is_already_exists;
use hearth_core::launch_context::DECISION_FILE_NAME;
use hearth_core::time_utils::utc_timestamp_path_segment;
use hearth_core::{
    short_hex_id, utc_timestamp_rfc3339, write_text_exclusive, BootstrapError, BootstrapResult,
    Decision, EventLog, LaunchContext, LogRotationPolicy, PendingDecision,
};
use serde_json::json;
use thiserror::Error;

pub const LAUNCHES_DIR_NAME: &str = "launches";
pub const DECISION_COMMITTED_EVENT: &str = "decision_committed";
pub const RUNTIME_CONTROLLER_SUBCOMMAND: &str = "runtime-controller";

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Runtime already initialized")]
    AlreadyInitialized,
    #[error("No decision available to commit")]
    NothingToCommit,
    #[error("Runtime directory collision")]
    DirectoryCollision,
    #[error("Decision already committed")]
    DecisionAlreadyCommitted,
    #[error("launch context is not ready for commit: {0}")]
    Launch(#[source] BootstrapError),
    #[error("Failed to write decision.json: {0}")]
    Persistence(String),
    #[error("failed to launch runtime controller: {0}")]
    Spawn(#[source] BootstrapError),
}

impl CommitError {
    /// Precondition violations; the preboot service keeps serving.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized
                | Self::NothingToCommit
                | Self::DirectoryCollision
                | Self::DecisionAlreadyCommitted
        )
    }

    pub fn status_code(&self) -> u16 {
        if self.is_conflict() {
            409
        } else {
            500
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "already_initialized",
            Self::NothingToCommit => "nothing_to_commit",
            Self::DirectoryCollision => "directory_collision",
            Self::DecisionAlreadyCommitted => "decision_already_committed",
            Self::Launch(_) => "launch_context_invalid",
            Self::Persistence(_) => "persistence_failed",
            Self::Spawn(_) => "spawn_error",
        }
    }
}

/// Starts the runtime controller for a committed launch without waiting on it.
pub trait ControllerLauncher: Send + Sync {
    /// Returns the pid of the spawned controller.
    fn launch(&self, context: &LaunchContext) -> BootstrapResult<u32>;
}

/// Spawns the controller as an independent process carrying the launch
/// markers in its environment.
#[derive(Debug, Clone)]
pub struct ProcessControllerLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessControllerLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-executes the current binary as `<global_args> runtime-controller`.
    pub fn current_exe(global_args: Vec<String>) -> anyhow::Result<Self> {
        let program = std::env::current_exe().context("failed to resolve current executable")?;
        let mut args = global_args;
        args.push(RUNTIME_CONTROLLER_SUBCOMMAND.to_string());
        Ok(Self::new(program, args))
    }
}

impl ControllerLauncher for ProcessControllerLauncher {
    fn launch(&self, context: &LaunchContext) -> BootstrapResult<u32> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        for (key, value) in context.env_vars() {
            command.env(key, value);
        }
        let mut child = command
            .spawn()
            .map_err(|error| BootstrapError::spawn("runtime controller", error))?;
        let pid = child.id();
        // Reap only; the controller is not supervised from here.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        tracing::info!(pid, program = %self.program.display(), "runtime controller launched");
        Ok(pid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub runtime_dir: PathBuf,
    pub runtime_id: String,
    pub decision: Decision,
    pub controller_pid: u32,
}

#[derive(Clone)]
pub struct CommitProtocol {
    launcher: Arc<dyn ControllerLauncher>,
    log_policy: LogRotationPolicy,
}

impl CommitProtocol {
    pub fn new(launcher: Arc<dyn ControllerLauncher>) -> Self {
        Self {
            launcher,
            log_policy: LogRotationPolicy::default(),
        }
    }

    pub fn with_log_policy(mut self, policy: LogRotationPolicy) -> Self {
        self.log_policy = policy;
        self
    }

    /// Persists `pending` into a freshly created runtime directory and
    /// launches the controller.
    ///
    /// Preconditions, checked in order: no runtime markers yet, a pending
    /// decision exists, and the runtime directory can be created exclusively.
    pub fn commit(
        &self,
        pending: &mut Option<PendingDecision>,
        launch: &mut LaunchContext,
    ) -> Result<CommitOutcome, CommitError> {
        if launch.has_runtime_markers() {
            return Err(CommitError::AlreadyInitialized);
        }
        let Some(pending) = pending.as_mut() else {
            return Err(CommitError::NothingToCommit);
        };
        if pending.committed {
            return Err(CommitError::DecisionAlreadyCommitted);
        }

        let runtime_dir = launch.planned_runtime_dir().map_err(CommitError::Launch)?;
        if let Err(error) = std::fs::create_dir(&runtime_dir) {
            if is_already_exists(&error) {
                return Err(CommitError::DirectoryCollision);
            }
            return Err(CommitError::Persistence(format!(
                "failed to create {}: {error}",
                runtime_dir.display()
            )));
        }

        let decision = pending.to_decision(utc_timestamp_rfc3339());
        let rendered = decision
            .to_pretty_json()
            .map_err(|error| CommitError::Persistence(error.to_string()))?;
        let decision_path = runtime_dir.join(DECISION_FILE_NAME);
        if let Err(error) = write_text_exclusive(&decision_path, &rendered) {
            if is_already_exists(&error) {
                return Err(CommitError::DecisionAlreadyCommitted);
            }
            tracing::error!(path = %decision_path.display(), %error, "failed to persist runtime decision");
            return Err(CommitError::Persistence(error.to_string()));
        }
        pending.committed = true;

        let runtime_id = launch
            .enter_runtime(&runtime_dir)
            .map_err(CommitError::Launch)?;
        tracing::info!(
            mode = %decision.mode,
            runtime_dir = %runtime_dir.display(),
            %runtime_id,
            "preboot decision committed"
        );
        EventLog::in_runtime_dir(&runtime_dir, self.log_policy).record(
            DECISION_COMMITTED_EVENT,
            json!({
                "mode": decision.mode,
                "runtime_id": runtime_id,
            }),
        );

        let controller_pid = self.launcher.launch(launch).map_err(CommitError::Spawn)?;
        Ok(CommitOutcome {
            runtime_dir,
            runtime_id,
            decision,
            controller_pid,
        })
    }
}

/// Creates `<project_root>/logs/launches/<utc-ts>__launch-<hex>` and returns
/// it with its launch id (the directory name).
pub fn create_launch_dir(project_root: &Path) -> anyhow::Result<(PathBuf, String)> {
    let launches_root = project_root.join("logs").join(LAUNCHES_DIR_NAME);
    create_launch_dir_in(&launches_root)
}

pub fn create_launch_dir_in(launches_root: &Path) -> anyhow::Result<(PathBuf, String)> {
    std::fs::create_dir_all(launches_root)
        .with_context(|| format!("failed to create {}", launches_root.display()))?;
    let launch_id = format!(
        "{}__launch-{}",
        utc_timestamp_path_segment(),
        short_hex_id()
    );
    let launch_dir = launches_root.join(&launch_id);
    std::fs::create_dir(&launch_dir)
        .with_context(|| format!("failed to create launch dir {}", launch_dir.display()))?;
    Ok((launch_dir, launch_id))
}
