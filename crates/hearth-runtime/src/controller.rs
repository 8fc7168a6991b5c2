//! Runtime lifecycle controller: turns a committed decision into running
//! local components.

use std::io;
use std::path::{Path, PathBuf};

use hearth_core::launch_context::DECISION_FILE_NAME;
use hearth_core::{
    BootstrapError, BootstrapResult, EventLog, HearthConfig, LaunchContext, LogRotationPolicy,
};
use serde_json::json;

use crate::child_process::{port_is_free, ChildCommand, ManagedChild};
use crate::lifecycle::{RuntimeLifecycle, RuntimeState};
use crate::runtime_lock::RuntimeLock;
use crate::runtime_policy::RuntimePolicy;
use crate::topology::{load_decision, TopologyDecision};

pub const AI_LOG_DIR_NAME: &str = "llm";
pub const AI_ROLE_ENV: &str = "HEARTH_AI_ROLE";
const DEFAULT_AI_ROLE: &str = "local";

#[derive(Debug, Clone)]
pub struct RuntimeControllerConfig {
    pub backend: ChildCommand,
    pub backend_port: u16,
    pub ai_launcher: ChildCommand,
    pub ai_role: String,
    pub log_policy: LogRotationPolicy,
}

impl RuntimeControllerConfig {
    pub fn from_config(config: &HearthConfig) -> Self {
        Self {
            backend: ChildCommand::from(&config.backend),
            backend_port: config.node.daemon_port,
            ai_launcher: ChildCommand::from(&config.ai.launcher),
            ai_role: DEFAULT_AI_ROLE.to_string(),
            log_policy: LogRotationPolicy::from_env(),
        }
    }
}

pub struct RuntimeController {
    context: LaunchContext,
    config: RuntimeControllerConfig,
    lifecycle: RuntimeLifecycle,
    runtime_dir: Option<PathBuf>,
    lock: Option<RuntimeLock>,
    decision: Option<TopologyDecision>,
    children: Vec<ManagedChild>,
    events: Option<EventLog>,
}

impl RuntimeController {
    pub fn new(context: LaunchContext, config: RuntimeControllerConfig) -> Self {
        Self {
            context,
            config,
            lifecycle: RuntimeLifecycle::new(),
            runtime_dir: None,
            lock: None,
            decision: None,
            children: Vec::new(),
            events: None,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.lifecycle.state()
    }

    pub fn runtime_dir(&self) -> Option<&Path> {
        self.runtime_dir.as_deref()
    }

    pub fn decision(&self) -> Option<&TopologyDecision> {
        self.decision.as_ref()
    }

    pub fn child_pids(&self) -> Vec<u32> {
        self.children.iter().map(ManagedChild::pid).collect()
    }

    /// Runs the startup sequence up to RUNNING.
    ///
    /// Any error is fatal to the controller process; the caller is expected
    /// to exit non-zero. Partially started children are stopped on drop.
    pub fn start(&mut self) -> BootstrapResult<()> {
        if self.lifecycle.state() != RuntimeState::Init {
            return Err(BootstrapError::Lifecycle(format!(
                "controller already started (state {})",
                self.lifecycle.state()
            )));
        }
        let runtime_dir = self.context.validate_runtime()?;
        tracing::info!(runtime_dir = %runtime_dir.display(), "runtime controller starting");
        if !runtime_dir.join(DECISION_FILE_NAME).is_file() {
            return Err(BootstrapError::SequenceViolation(format!(
                "{DECISION_FILE_NAME} missing in runtime directory"
            )));
        }
        self.runtime_dir = Some(runtime_dir.clone());
        self.events = Some(EventLog::in_runtime_dir(&runtime_dir, self.config.log_policy));

        self.lock = Some(RuntimeLock::acquire(&runtime_dir, self.config.backend_port)?);
        self.record("runtime_lock_acquired", json!({ "pid": std::process::id() }));

        let decision = load_decision(&runtime_dir)?;
        tracing::info!(mode = %decision.mode, "runtime decision loaded");
        self.advance(RuntimeState::TopologyLoaded)?;

        RuntimePolicy::validate(&decision)?;
        self.advance(RuntimeState::PolicyValidated)?;

        if RuntimePolicy::can_start_backend(&decision) {
            self.start_backend()?;
        }
        if RuntimePolicy::can_start_ai(&decision) {
            self.start_ai(&runtime_dir)?;
        }
        self.decision = Some(decision);

        if !self.lifecycle.state().has_started_component() {
            return Err(BootstrapError::Lifecycle(
                "Runtime started with no active components".to_string(),
            ));
        }
        self.advance(RuntimeState::Running)?;
        tracing::info!(children = self.children.len(), "runtime running");
        Ok(())
    }

    fn start_backend(&mut self) -> BootstrapResult<()> {
        let port = self.config.backend_port;
        tracing::info!(port, "starting backend");
        if !port_is_free(port) {
            return Err(BootstrapError::spawn(
                "backend",
                io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("Backend port {port} already in use"),
                ),
            ));
        }
        let child = self.config.backend.spawn("backend", &self.context)?;
        self.children.push(child);
        self.advance(RuntimeState::BackendStarted)
    }

    fn start_ai(&mut self, runtime_dir: &Path) -> BootstrapResult<()> {
        let role = self.config.ai_role.clone();
        let log_dir = runtime_dir.join(AI_LOG_DIR_NAME);
        std::fs::create_dir_all(&log_dir).map_err(|error| BootstrapError::spawn("ai runtime", error))?;
        let log_path = log_dir.join(format!("{role}-lifecycle.log"));
        tracing::info!(%role, log = %log_path.display(), "starting ai runtime launcher");
        let child = self
            .config
            .ai_launcher
            .clone()
            .with_env(AI_ROLE_ENV, role)
            .with_log_path(log_path)
            .spawn("ai runtime", &self.context)?;
        self.children.push(child);
        self.advance(RuntimeState::AiStarted)
    }

    fn advance(&mut self, next: RuntimeState) -> BootstrapResult<()> {
        let from = self.lifecycle.state();
        self.lifecycle.transition(next)?;
        self.record(
            "lifecycle_transition",
            json!({ "from": from.as_str(), "to": next.as_str() }),
        );
        Ok(())
    }

    fn record(&self, event: &str, details: serde_json::Value) {
        if let Some(events) = &self.events {
            events.record(event, details);
        }
    }

    /// Stops children, releases the lock, and enters SHUTDOWN. Idempotent.
    pub fn shutdown(&mut self) {
        if self.lifecycle.state() == RuntimeState::Shutdown {
            return;
        }
        tracing::info!(state = %self.lifecycle.state(), "runtime controller shutdown");
        for child in self.children.iter_mut().rev() {
            child.terminate();
        }
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        if let Err(error) = self.advance(RuntimeState::Shutdown) {
            tracing::warn!(%error, "shutdown transition rejected");
        }
    }
}

impl Drop for RuntimeController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use hearth_core::{PendingDecision, TopologyMode};

    use super::*;
    use crate::runtime_lock::RUNTIME_LOCK_FILE_NAME;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    fn sleeper() -> ChildCommand {
        ChildCommand::new("sleep").with_args(["30"])
    }

    fn config(backend_port: u16) -> RuntimeControllerConfig {
        RuntimeControllerConfig {
            backend: sleeper(),
            backend_port,
            ai_launcher: sleeper(),
            ai_role: "local".to_string(),
            log_policy: LogRotationPolicy::default(),
        }
    }

    fn committed_context(root: &Path, decision_json: Option<String>) -> LaunchContext {
        let launch_dir = root.join("launch-a");
        let runtime_dir = launch_dir.join("runtime");
        std::fs::create_dir_all(&runtime_dir).expect("runtime dir");
        if let Some(body) = decision_json {
            std::fs::write(runtime_dir.join(DECISION_FILE_NAME), body).expect("decision");
        }
        let mut context = LaunchContext::for_preboot(&launch_dir, "launch-a");
        context.enter_runtime(&runtime_dir).expect("enter runtime");
        context
    }

    fn decision_json(mode: TopologyMode, host: Option<&str>) -> String {
        let pending = PendingDecision::stage(
            mode,
            host.map(hearth_core::DecisionHost::from_address),
            None,
            None,
        );
        pending
            .to_decision("2026-01-01T00:00:00Z")
            .to_pretty_json()
            .expect("json")
    }

    #[test]
    fn integration_local_decision_starts_backend_and_ai_then_shuts_down() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = committed_context(temp.path(), Some(decision_json(TopologyMode::Local, None)));
        let mut controller = RuntimeController::new(context, config(free_port()));
        controller.start().expect("start");
        assert_eq!(controller.state(), RuntimeState::Running);
        assert_eq!(controller.child_pids().len(), 2);

        let runtime_dir = controller.runtime_dir().expect("runtime dir").to_path_buf();
        assert!(runtime_dir.join(RUNTIME_LOCK_FILE_NAME).exists());
        assert!(runtime_dir.join(AI_LOG_DIR_NAME).join("local-lifecycle.log").exists());

        controller.shutdown();
        controller.shutdown();
        assert_eq!(controller.state(), RuntimeState::Shutdown);
        assert!(!runtime_dir.join(RUNTIME_LOCK_FILE_NAME).exists());

        let events = EventLog::in_runtime_dir(&runtime_dir, LogRotationPolicy::default()).read_records();
        let transitions: Vec<String> = events
            .iter()
            .filter(|record| record["event"] == "lifecycle_transition")
            .filter_map(|record| record["details"]["to"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            transitions,
            vec![
                "TOPOLOGY_LOADED",
                "POLICY_VALIDATED",
                "BACKEND_STARTED",
                "AI_STARTED",
                "RUNNING",
                "SHUTDOWN"
            ]
        );
    }

    #[test]
    fn regression_remote_decision_starts_nothing_and_fails_lifecycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = committed_context(
            temp.path(),
            Some(decision_json(TopologyMode::Remote, Some("192.168.1.20"))),
        );
        let mut controller = RuntimeController::new(context, config(free_port()));
        let error = controller.start().expect_err("nothing started");
        assert!(matches!(error, BootstrapError::Lifecycle(_)));
        assert!(error.to_string().contains("no active components"));
        assert!(controller.child_pids().is_empty());
        assert_eq!(controller.state(), RuntimeState::PolicyValidated);
    }

    #[test]
    fn regression_backend_port_in_use_is_a_spawn_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let busy = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = busy.local_addr().expect("addr").port();
        let context = committed_context(temp.path(), Some(decision_json(TopologyMode::Local, None)));
        let mut controller = RuntimeController::new(context, config(port));
        let error = controller.start().expect_err("port busy");
        assert_eq!(error.code(), "spawn_error");
        assert!(error.to_string().contains("already in use"));
        assert!(controller.child_pids().is_empty());
    }

    #[test]
    fn regression_missing_markers_or_decision_are_sequence_violations() {
        let mut controller = RuntimeController::new(LaunchContext::default(), config(free_port()));
        let error = controller.start().expect_err("no markers");
        assert!(matches!(error, BootstrapError::SequenceViolation(_)));

        let temp = tempfile::tempdir().expect("tempdir");
        let context = committed_context(temp.path(), None);
        let mut controller = RuntimeController::new(context, config(free_port()));
        let error = controller.start().expect_err("no decision");
        assert!(matches!(error, BootstrapError::SequenceViolation(_)));
        assert!(error.to_string().contains("decision.json missing"));
    }

    #[test]
    fn regression_second_controller_on_same_runtime_dir_collides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = committed_context(temp.path(), Some(decision_json(TopologyMode::Local, None)));
        let mut sleeper = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("sleep");
        let runtime_dir = context.runtime_dir.clone().expect("runtime dir");
        let _foreign = RuntimeLock::acquire_for(&runtime_dir, sleeper.id(), 7030).expect("foreign lock");

        let mut controller = RuntimeController::new(context, config(free_port()));
        let error = controller.start().expect_err("collision");
        assert!(error.is_conflict());
        assert_eq!(controller.state(), RuntimeState::Init);
        let _ = sleeper.kill();
        let _ = sleeper.wait();
    }
}
