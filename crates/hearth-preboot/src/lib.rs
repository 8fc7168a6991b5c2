//! Preboot phase of a Hearth node: the decision state machine, the
//! exactly-once commit of the chosen topology, and the HTTP service that
//! drives both.

pub mod commit;
pub mod context;
pub mod orchestrator;
pub mod preboot_lock;
pub mod preboot_server;
pub mod state_graph;

pub use commit::{
    create_launch_dir, create_launch_dir_in, CommitError, CommitOutcome, CommitProtocol,
    ControllerLauncher, ProcessControllerLauncher, RUNTIME_CONTROLLER_SUBCOMMAND,
};
pub use context::{DispatchPayload, PrebootContext, RemoteDiscoveryState};
pub use orchestrator::{DecisionStatus, PrebootOrchestrator, PrebootStateSnapshot, PrebootStatus};
pub use preboot_lock::PrebootLock;
pub use preboot_server::{
    build_preboot_router, run_preboot_server, serve_preboot, PrebootServerConfig,
    PrebootServerState,
};
pub use state_graph::{Guard, GuardContext, PrebootState, StateGraph, Transition};
