use hearth_core::{short_hex_id, DecisionHost, DecisionPolicy, DecisionResources, PendingDecision, TopologyMode};
use hearth_discovery::DiscoveredHost;
use serde::Serialize;

use crate::context::{DispatchPayload, PrebootContext};
use crate::state_graph::{PrebootState, StateGraph};

pub const HOST_FOUND_EVENT: &str = "host_found";

/// Decision as reported by `/preboot/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecisionStatus {
    pub decided: bool,
    pub committed: bool,
    pub mode: Option<TopologyMode>,
    pub host: Option<DecisionHost>,
    pub resources: Option<DecisionResources>,
    pub policy: Option<DecisionPolicy>,
}

impl DecisionStatus {
    fn from_pending(pending: Option<&PendingDecision>) -> Self {
        match pending {
            None => Self::default(),
            Some(pending) => Self {
                decided: true,
                committed: pending.committed,
                mode: Some(pending.mode),
                host: pending.host.clone(),
                resources: Some(pending.resources.clone()),
                policy: Some(pending.policy),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrebootStateSnapshot {
    pub phase: PrebootState,
    pub mode: Option<TopologyMode>,
    pub scope: Option<String>,
    pub scanning: bool,
    pub discovered_hosts: Vec<DiscoveredHost>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrebootStatus {
    pub session_id: String,
    pub state: PrebootStateSnapshot,
    pub decision: DecisionStatus,
}

/// Owns the preboot state machine and its context. One instance per
/// preboot process; never shared as a global.
#[derive(Debug, Clone)]
pub struct PrebootOrchestrator {
    graph: StateGraph,
    state: PrebootState,
    context: PrebootContext,
    session_id: String,
}

impl Default for PrebootOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PrebootOrchestrator {
    pub fn new() -> Self {
        Self::with_graph(StateGraph::preboot())
    }

    pub fn with_graph(graph: StateGraph) -> Self {
        Self {
            state: graph.initial(),
            graph,
            context: PrebootContext::default(),
            session_id: format!("preboot-{}", short_hex_id()),
        }
    }

    pub fn state(&self) -> PrebootState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &PrebootContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PrebootContext {
        &mut self.context
    }

    /// Merges `payload` into the context, then follows the matching edge.
    /// Events with no matching edge leave the state unchanged.
    pub fn dispatch(&mut self, event: &str, payload: DispatchPayload) -> PrebootState {
        self.context.update(payload);
        let previous = self.state;
        self.state = self
            .graph
            .next_state(previous, event, &self.context.guard_context());
        if previous != self.state {
            tracing::info!(event, from = %previous, to = %self.state, "preboot transition");
        } else {
            tracing::debug!(event, state = %self.state, "preboot event ignored");
        }
        self.state
    }

    /// Buffers a discovered host and re-enters HOST_CONFIG.
    pub fn handle_discovered_host(&mut self, host: DiscoveredHost) -> PrebootState {
        if self.context.add_discovered_host(host) {
            tracing::debug!(
                count = self.context.remote().discovered_hosts.len(),
                "discovered host buffered"
            );
        }
        self.dispatch(HOST_FOUND_EVENT, DispatchPayload::default())
    }

    pub fn status(&self) -> PrebootStatus {
        let remote = self.context.remote();
        PrebootStatus {
            session_id: self.session_id.clone(),
            state: PrebootStateSnapshot {
                phase: self.state,
                mode: self.context.mode(),
                scope: remote.scope.clone(),
                scanning: remote.scanning,
                discovered_hosts: remote.discovered_hosts.clone(),
                error: self.context.error().map(str::to_string),
            },
            decision: DecisionStatus::from_pending(self.context.pending()),
        }
    }
}
