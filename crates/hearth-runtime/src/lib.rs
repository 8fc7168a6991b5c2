//! Runtime phase of a Hearth node.
//!
//! The runtime controller is the only authority that starts backend and AI
//! processes. It runs inside a runtime directory created by the preboot
//! commit, validates the committed topology, and walks a strict lifecycle
//! until shutdown.

pub mod agent_gate;
pub mod ai_health;
pub mod ai_readiness;
pub mod child_process;
pub mod controller;
pub mod lifecycle;
pub mod runtime_lock;
pub mod runtime_policy;
pub mod topology;

pub use agent_gate::{
    gate_agent_bootstrap, AgentBootstrap, AgentGateOutcome, ReadyMarkerBootstrap,
    AI_READY_FILE_NAME,
};
pub use ai_health::{AiServerHealth, AiServerStatus, HealthState};
pub use ai_readiness::{AiExecutionManager, AiExecutionStatus, AiReadinessConfig, AiRoleEndpoint};
pub use child_process::{port_is_free, ChildCommand, ManagedChild};
pub use controller::{RuntimeController, RuntimeControllerConfig};
pub use lifecycle::{RuntimeLifecycle, RuntimeState};
pub use runtime_lock::{read_lock_record, RuntimeLock, RuntimeLockRecord, RUNTIME_LOCK_FILE_NAME};
pub use runtime_policy::RuntimePolicy;
pub use topology::{load_decision, TopologyDecision};
