use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DECISION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    Local,
    Remote,
    Cloud,
}

impl TopologyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Cloud => "cloud",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target host of a remote or cloud decision.
///
/// Accepts either a bare address string or an object on input; always
/// serializes as an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DecisionHostWire")]
pub struct DecisionHost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl DecisionHost {
    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            ip: Some(address.into()),
            ..Self::default()
        }
    }

    /// A host is usable when it names at least one way to reach or identify it.
    pub fn is_specified(&self) -> bool {
        [&self.host_id, &self.hostname, &self.ip]
            .iter()
            .any(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
    }

    pub fn address(&self) -> Option<&str> {
        self.ip.as_deref().or(self.hostname.as_deref())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DecisionHostWire {
    Address(String),
    Record {
        #[serde(default)]
        host_id: Option<String>,
        #[serde(default)]
        hostname: Option<String>,
        #[serde(default)]
        ip: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        fingerprint: Option<String>,
    },
}

impl From<DecisionHostWire> for DecisionHost {
    fn from(wire: DecisionHostWire) -> Self {
        match wire {
            DecisionHostWire::Address(address) => Self::from_address(address),
            DecisionHostWire::Record {
                host_id,
                hostname,
                ip,
                port,
                fingerprint,
            } => Self {
                host_id,
                hostname,
                ip,
                port,
                fingerprint,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BackendResource {
    pub fn local_embedded() -> Self {
        Self {
            kind: "local".to_string(),
            host: Some("localhost".to_string()),
            mode: Some("embedded".to_string()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRuntimeResource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub llm: bool,
    #[serde(default = "default_true")]
    pub embeddings: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AiRuntimeResource {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            llm: true,
            embeddings: true,
            extra: Map::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResources {
    #[serde(default)]
    pub backend: Option<BackendResource>,
    #[serde(default)]
    pub ai_runtime: Option<AiRuntimeResource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default = "default_true")]
    pub shutdown_on_ui_exit: bool,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            auto_restart: false,
            shutdown_on_ui_exit: true,
        }
    }
}

/// A committed topology decision, as persisted in `decision.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub version: u32,
    pub decided_at: String,
    pub mode: TopologyMode,
    pub host: Option<DecisionHost>,
    pub resources: DecisionResources,
    pub policy: DecisionPolicy,
}

impl Decision {
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Mutable staging form of a decision held by the preboot orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingDecision {
    pub mode: TopologyMode,
    pub host: Option<DecisionHost>,
    pub resources: DecisionResources,
    pub policy: DecisionPolicy,
    pub committed: bool,
}

impl PendingDecision {
    /// Stages a decision, filling resource and policy defaults.
    pub fn stage(
        mode: TopologyMode,
        host: Option<DecisionHost>,
        resources: Option<DecisionResources>,
        policy: Option<DecisionPolicy>,
    ) -> Self {
        let mut resources = resources.unwrap_or_default();
        if mode == TopologyMode::Local && resources.backend.is_none() {
            resources.backend = Some(BackendResource::local_embedded());
        }
        if resources.ai_runtime.is_none() {
            resources.ai_runtime = Some(AiRuntimeResource::default());
        }
        Self {
            mode,
            host,
            resources,
            policy: policy.unwrap_or_default(),
            committed: false,
        }
    }

    /// Produces the immutable decision stamped with the current schema version.
    pub fn to_decision(&self, decided_at: impl Into<String>) -> Decision {
        Decision {
            version: DECISION_SCHEMA_VERSION,
            decided_at: decided_at.into(),
            mode: self.mode,
            host: self.host.clone(),
            resources: self.resources.clone(),
            policy: self.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unit_stage_local_fills_embedded_backend_and_local_ai_runtime() {
        let pending = PendingDecision::stage(TopologyMode::Local, None, None, None);
        assert_eq!(pending.resources.backend, Some(BackendResource::local_embedded()));
        assert_eq!(
            pending.resources.ai_runtime,
            Some(AiRuntimeResource::default())
        );
        assert_eq!(pending.policy, DecisionPolicy::default());
        assert!(!pending.committed);
    }

    #[test]
    fn unit_stage_remote_keeps_backend_absent() {
        let pending = PendingDecision::stage(
            TopologyMode::Remote,
            Some(DecisionHost::from_address("192.168.1.40")),
            None,
            None,
        );
        assert!(pending.resources.backend.is_none());
        assert!(pending.resources.ai_runtime.is_some());
    }

    #[test]
    fn functional_decision_serializes_with_wire_field_names() {
        let decision = PendingDecision::stage(TopologyMode::Local, None, None, None)
            .to_decision("2026-01-01T00:00:00Z");
        let value = serde_json::to_value(&decision).expect("serialize");
        assert_eq!(value["version"], 1);
        assert_eq!(value["mode"], "local");
        assert_eq!(value["host"], serde_json::Value::Null);
        assert_eq!(
            value["resources"]["backend"],
            json!({"type": "local", "host": "localhost", "mode": "embedded"})
        );
        assert_eq!(
            value["resources"]["ai_runtime"],
            json!({"type": "local", "llm": true, "embeddings": true})
        );
        assert_eq!(
            value["policy"],
            json!({"auto_restart": false, "shutdown_on_ui_exit": true})
        );
    }

    #[test]
    fn unit_decision_host_accepts_string_or_object() {
        let from_string: DecisionHost = serde_json::from_value(json!("10.0.0.7")).expect("string");
        assert_eq!(from_string.ip.as_deref(), Some("10.0.0.7"));

        let from_object: DecisionHost =
            serde_json::from_value(json!({"host_id": "node-b", "ip": "10.0.0.8"}))
                .expect("object");
        assert_eq!(from_object.host_id.as_deref(), Some("node-b"));
        assert!(from_object.is_specified());

        let encoded = serde_json::to_value(&from_string).expect("encode");
        assert_eq!(encoded, json!({"ip": "10.0.0.7"}));
    }

    #[test]
    fn regression_blank_host_is_not_specified() {
        let host: DecisionHost = serde_json::from_value(json!({"ip": "  "})).expect("object");
        assert!(!host.is_specified());
    }

    #[test]
    fn unit_topology_mode_parse_is_case_insensitive() {
        assert_eq!(TopologyMode::parse("LOCAL"), Some(TopologyMode::Local));
        assert_eq!(TopologyMode::parse("cloud"), Some(TopologyMode::Cloud));
        assert_eq!(TopologyMode::parse("hybrid"), None);
    }
}
