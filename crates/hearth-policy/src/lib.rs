//! Resource admission policy for local AI execution.
//!
//! [`evaluate`] maps a [`SystemFacts`] snapshot to an admission status and an
//! execution preference. [`HostFactsProvider`] gathers those facts from the
//! running machine.

pub mod facts;
pub mod local_policy;

pub use facts::{
    CapabilityFacts, CpuFacts, FactsProvider, GpuFacts, HostFactsProvider, MemoryFacts,
    PlatformFacts, SystemFacts, ToolCommand,
};
pub use local_policy::{
    evaluate, ExecutionPlan, ExecutionTarget, PolicyEvaluation, PolicyStatus, MIN_CPU_CORES_CPU_ONLY,
    MIN_RAM_CPU_ONLY_GB, MIN_RAM_SAFE_GB, MIN_VRAM_GB,
};
