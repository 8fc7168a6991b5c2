use std::path::Path;

use hearth_core::launch_context::DECISION_FILE_NAME;
use hearth_core::{BootstrapError, BootstrapResult, DecisionHost, DecisionResources, TopologyMode};
use serde::Deserialize;
use serde_json::Value;

/// Committed topology as the runtime controller consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyDecision {
    pub mode: TopologyMode,
    pub host: Option<DecisionHost>,
    pub resources: DecisionResources,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecisionFile {
    mode: Option<Value>,
    host: Option<DecisionHost>,
    resources: Option<DecisionResources>,
}

/// Reads and structurally validates `<runtime_dir>/decision.json`.
///
/// Only `local` and `remote` are accepted, and `remote` needs a host.
pub fn load_decision(runtime_dir: &Path) -> BootstrapResult<TopologyDecision> {
    let path = runtime_dir.join(DECISION_FILE_NAME);
    let raw = std::fs::read_to_string(&path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            BootstrapError::InvalidDecision(format!("{DECISION_FILE_NAME} missing"))
        } else {
            BootstrapError::InvalidDecision(format!("failed to read {}: {error}", path.display()))
        }
    })?;
    let file: DecisionFile = serde_json::from_str(&raw).map_err(|error| {
        BootstrapError::InvalidDecision(format!("{DECISION_FILE_NAME} invalid: {error}"))
    })?;

    let mode = match file.mode.as_ref().and_then(Value::as_str).map(str::trim) {
        Some("local") => TopologyMode::Local,
        Some("remote") => TopologyMode::Remote,
        _ => {
            let shown = file.mode.map(|mode| mode.to_string()).unwrap_or_else(|| "null".into());
            return Err(BootstrapError::InvalidDecision(format!("Invalid mode: {shown}")));
        }
    };
    let host = file.host.filter(DecisionHost::is_specified);
    if mode == TopologyMode::Remote && host.is_none() {
        return Err(BootstrapError::InvalidDecision(
            "Remote mode requires host".to_string(),
        ));
    }

    Ok(TopologyDecision {
        mode,
        host,
        resources: file.resources.unwrap_or_default(),
    })
}
