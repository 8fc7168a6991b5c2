use std::collections::HashSet;

use hearth_core::{
    BootstrapError, BootstrapResult, DecisionHost, DecisionPolicy, DecisionResources,
    PendingDecision, TopologyMode,
};
use hearth_discovery::DiscoveredHost;
use serde::{Deserialize, Serialize};

use crate::state_graph::GuardContext;

/// Per-scan discovery buffer of the remote branch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoteDiscoveryState {
    pub scope: Option<String>,
    pub scanning: bool,
    pub discovered_hosts: Vec<DiscoveredHost>,
    #[serde(skip)]
    seen_ips: HashSet<String>,
}

impl RemoteDiscoveryState {
    /// Appends `host` unless its ip was already seen. Hosts without an ip are dropped.
    pub fn add_host(&mut self, host: DiscoveredHost) -> bool {
        let ip = host.ip.trim();
        if ip.is_empty() || !self.seen_ips.insert(ip.to_string()) {
            return false;
        }
        self.discovered_hosts.push(host);
        true
    }

    pub fn clear(&mut self) {
        self.discovered_hosts.clear();
        self.seen_ips.clear();
    }
}

/// Fields a `dispatch` call may merge into the context.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchPayload {
    pub mode: Option<TopologyMode>,
    pub host: Option<DecisionHost>,
    pub resources: Option<DecisionResources>,
    pub policy: Option<DecisionPolicy>,
    pub scope: Option<String>,
    pub scanning: Option<bool>,
    pub error: Option<String>,
}

impl DispatchPayload {
    pub fn mode(mode: TopologyMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Mutable preboot state owned by one orchestrator.
#[derive(Debug, Clone, Default)]
pub struct PrebootContext {
    mode: Option<TopologyMode>,
    remote: RemoteDiscoveryState,
    pending: Option<PendingDecision>,
    error: Option<String>,
}

impl PrebootContext {
    pub fn mode(&self) -> Option<TopologyMode> {
        self.mode
    }

    pub fn remote(&self) -> &RemoteDiscoveryState {
        &self.remote
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn pending(&self) -> Option<&PendingDecision> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> &mut Option<PendingDecision> {
        &mut self.pending
    }

    /// Shallow merge. A payload naming a mode also restages the pending
    /// decision, unless it was already committed.
    pub fn update(&mut self, payload: DispatchPayload) {
        if let Some(scope) = payload.scope {
            if self.remote.scope.as_deref() != Some(scope.as_str()) {
                self.remote.clear();
            }
            self.remote.scope = Some(scope);
        }
        if let Some(scanning) = payload.scanning {
            self.remote.scanning = scanning;
        }
        if payload.error.is_some() {
            self.error = payload.error;
        }
        if let Some(mode) = payload.mode {
            self.mode = Some(mode);
            if let Err(error) =
                self.stage_decision(mode, payload.host, payload.resources, payload.policy)
            {
                tracing::debug!(%error, "dispatch payload did not restage decision");
            }
        }
    }

    pub fn stage_decision(
        &mut self,
        mode: TopologyMode,
        host: Option<DecisionHost>,
        resources: Option<DecisionResources>,
        policy: Option<DecisionPolicy>,
    ) -> BootstrapResult<&PendingDecision> {
        if self.pending.as_ref().is_some_and(|pending| pending.committed) {
            return Err(BootstrapError::Collision(
                "decision already committed".to_string(),
            ));
        }
        self.mode = Some(mode);
        let pending = self
            .pending
            .insert(PendingDecision::stage(mode, host, resources, policy));
        Ok(&*pending)
    }

    pub fn add_discovered_host(&mut self, host: DiscoveredHost) -> bool {
        self.remote.add_host(host)
    }

    pub fn guard_context(&self) -> GuardContext {
        GuardContext {
            has_pending_decision: self.pending.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use hearth_trust::TrustSnapshot;

    use super::*;

    fn host(ip: &str) -> DiscoveredHost {
        DiscoveredHost::annotated(ip, None, None, true, &TrustSnapshot::default())
    }

    #[test]
    fn unit_discovery_buffer_dedups_by_ip_and_drops_blank() {
        let mut context = PrebootContext::default();
        assert!(context.add_discovered_host(host("10.0.0.2")));
        assert!(!context.add_discovered_host(host("10.0.0.2")));
        assert!(!context.add_discovered_host(host("  ")));
        assert!(context.add_discovered_host(host("10.0.0.3")));
        assert_eq!(context.remote().discovered_hosts.len(), 2);
    }

    #[test]
    fn functional_mode_payload_stages_decision_with_defaults() {
        let mut context = PrebootContext::default();
        context.update(DispatchPayload::default());
        assert!(context.pending().is_none());

        context.update(DispatchPayload::mode(TopologyMode::Local));
        let pending = context.pending().expect("pending");
        assert_eq!(pending.mode, TopologyMode::Local);
        assert!(pending.resources.backend.is_some());
        assert_eq!(pending.policy, DecisionPolicy::default());
        assert!(context.guard_context().has_pending_decision);
    }

    #[test]
    fn regression_committed_decision_is_not_restaged() {
        let mut context = PrebootContext::default();
        context.update(DispatchPayload::mode(TopologyMode::Local));
        if let Some(pending) = context.pending_mut().as_mut() {
            pending.committed = true;
        }
        context.update(DispatchPayload::mode(TopologyMode::Remote));
        assert_eq!(context.pending().map(|pending| pending.mode), Some(TopologyMode::Local));
        let error = context
            .stage_decision(TopologyMode::Cloud, None, None, None)
            .expect_err("committed");
        assert!(error.is_conflict());
    }

    #[test]
    fn unit_scope_change_resets_discovery_buffer() {
        let mut context = PrebootContext::default();
        context.update(DispatchPayload {
            scope: Some("lan".into()),
            ..DispatchPayload::default()
        });
        context.add_discovered_host(host("10.0.0.2"));
        context.update(DispatchPayload {
            scope: Some("wan".into()),
            ..DispatchPayload::default()
        });
        assert!(context.remote().discovered_hosts.is_empty());
        assert!(context.add_discovered_host(host("10.0.0.2")));
    }
}
