use std::fmt;

use hearth_core::{BootstrapError, BootstrapResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeState {
    Init,
    TopologyLoaded,
    PolicyValidated,
    BackendStarted,
    AiStarted,
    Running,
    Shutdown,
}

impl RuntimeState {
    pub const ALL: [RuntimeState; 7] = [
        RuntimeState::Init,
        RuntimeState::TopologyLoaded,
        RuntimeState::PolicyValidated,
        RuntimeState::BackendStarted,
        RuntimeState::AiStarted,
        RuntimeState::Running,
        RuntimeState::Shutdown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::TopologyLoaded => "TOPOLOGY_LOADED",
            Self::PolicyValidated => "POLICY_VALIDATED",
            Self::BackendStarted => "BACKEND_STARTED",
            Self::AiStarted => "AI_STARTED",
            Self::Running => "RUNNING",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// True while at least one local component has been started.
    pub fn has_started_component(self) -> bool {
        matches!(self, Self::BackendStarted | Self::AiStarted)
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only lifecycle of one runtime controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLifecycle {
    state: RuntimeState,
}

impl Default for RuntimeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeLifecycle {
    pub fn new() -> Self {
        Self {
            state: RuntimeState::Init,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn is_allowed(from: RuntimeState, to: RuntimeState) -> bool {
        use RuntimeState::*;
        match (from, to) {
            (Shutdown, _) => false,
            (_, Shutdown) => true,
            (Init, TopologyLoaded)
            | (TopologyLoaded, PolicyValidated)
            | (PolicyValidated, BackendStarted)
            | (PolicyValidated, AiStarted)
            | (BackendStarted, AiStarted)
            | (BackendStarted, Running)
            | (AiStarted, Running) => true,
            _ => false,
        }
    }

    /// Moves to `next`, or fails and leaves the state untouched.
    pub fn transition(&mut self, next: RuntimeState) -> BootstrapResult<()> {
        if !Self::is_allowed(self.state, next) {
            return Err(BootstrapError::Lifecycle(format!(
                "Invalid transition {} -> {next}",
                self.state
            )));
        }
        tracing::debug!(from = %self.state, to = %next, "runtime lifecycle transition");
        self.state = next;
        Ok(())
    }
}
