use hearth_core::{BootstrapError, BootstrapResult, TopologyMode};

use crate::topology::TopologyDecision;

/// Decides which local components a committed topology may start.
///
/// Local runs the backend and the AI runtime here; remote runs nothing
/// locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimePolicy;

impl RuntimePolicy {
    pub fn validate(decision: &TopologyDecision) -> BootstrapResult<()> {
        match decision.mode {
            TopologyMode::Local | TopologyMode::Remote => Ok(()),
            other => Err(BootstrapError::PolicyViolation(format!(
                "Unhandled policy for mode {other}"
            ))),
        }
    }

    pub fn can_start_backend(decision: &TopologyDecision) -> bool {
        decision.mode == TopologyMode::Local
    }

    pub fn can_start_ai(decision: &TopologyDecision) -> bool {
        decision.mode == TopologyMode::Local
    }
}
