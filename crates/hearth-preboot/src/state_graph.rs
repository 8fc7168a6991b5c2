//! Generic guarded transition table for the preboot flow.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrebootState {
    Init,
    VerifyLocal,
    SelectMode,
    HostConfig,
    Pairing,
    Resources,
    Confirm,
    Ready,
    Error,
}

impl PrebootState {
    pub const ALL: [PrebootState; 9] = [
        Self::Init,
        Self::VerifyLocal,
        Self::SelectMode,
        Self::HostConfig,
        Self::Pairing,
        Self::Resources,
        Self::Confirm,
        Self::Ready,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::VerifyLocal => "VERIFY_LOCAL",
            Self::SelectMode => "SELECT_MODE",
            Self::HostConfig => "HOST_CONFIG",
            Self::Pairing => "PAIRING",
            Self::Resources => "RESOURCES",
            Self::Confirm => "CONFIRM",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for PrebootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the preboot context that guards are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardContext {
    pub has_pending_decision: bool,
}

/// Edge predicate over a [`GuardContext`]. Only `apply` is guarded: it needs
/// a staged decision to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    HasPendingDecision,
}

impl Guard {
    pub fn allows(self, ctx: &GuardContext) -> bool {
        match self {
            Self::Always => true,
            Self::HasPendingDecision => ctx.has_pending_decision,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub source: PrebootState,
    pub event: String,
    pub target: PrebootState,
    pub guard: Guard,
}

#[derive(Debug, Clone)]
pub struct StateGraph {
    initial: PrebootState,
    transitions: Vec<Transition>,
}

impl StateGraph {
    pub fn new(initial: PrebootState) -> Self {
        Self {
            initial,
            transitions: Vec::new(),
        }
    }

    pub fn initial(&self) -> PrebootState {
        self.initial
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn add_transition(&mut self, source: PrebootState, event: &str, target: PrebootState) {
        self.add_guarded_transition(source, event, target, Guard::Always);
    }

    pub fn add_guarded_transition(
        &mut self,
        source: PrebootState,
        event: &str,
        target: PrebootState,
        guard: Guard,
    ) {
        self.transitions.push(Transition {
            source,
            event: event.to_string(),
            target,
            guard,
        });
    }

    /// First matching edge whose guard passes wins; otherwise `current`.
    pub fn next_state(&self, current: PrebootState, event: &str, ctx: &GuardContext) -> PrebootState {
        self.transitions
            .iter()
            .find(|transition| {
                transition.source == current
                    && transition.event == event
                    && transition.guard.allows(ctx)
            })
            .map(|transition| transition.target)
            .unwrap_or(current)
    }

    /// The preboot flow: verify, pick a mode, configure and pair a host when
    /// needed, confirm resources.
    pub fn preboot() -> Self {
        use PrebootState::*;

        let mut graph = Self::new(Init);
        graph.add_transition(Init, "start", VerifyLocal);
        graph.add_transition(VerifyLocal, "ok", SelectMode);
        graph.add_transition(VerifyLocal, "fail", Error);

        graph.add_transition(SelectMode, "local", Resources);
        graph.add_transition(SelectMode, "remote", HostConfig);
        graph.add_transition(SelectMode, "cloud", HostConfig);

        graph.add_transition(HostConfig, "pair_required", Pairing);
        graph.add_transition(HostConfig, "host_ready", Resources);
        graph.add_transition(HostConfig, "host_found", HostConfig);

        graph.add_transition(Pairing, "paired", Resources);
        graph.add_transition(Pairing, "reject", Error);

        graph.add_transition(Resources, "done", Confirm);
        graph.add_guarded_transition(Confirm, "apply", Ready, Guard::HasPendingDecision);
        graph
    }
}
