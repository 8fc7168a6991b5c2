use serde::{Deserialize, Serialize};

use crate::facts::SystemFacts;

pub const MIN_RAM_SAFE_GB: f64 = 6.0;
pub const MIN_RAM_CPU_ONLY_GB: f64 = 12.0;
pub const MIN_CPU_CORES_CPU_ONLY: u32 = 8;
pub const MIN_VRAM_GB: f64 = 6.0;

const DARWIN_OS: &str = "darwin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyStatus {
    Approved,
    Limited,
    Blocked,
}

impl PolicyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Limited => "LIMITED",
            Self::Blocked => "BLOCKED",
        }
    }

    pub fn allows_execution(self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub preferred: ExecutionTarget,
    pub fallback: Option<ExecutionTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub status: PolicyStatus,
    pub execution: Option<ExecutionPlan>,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl PolicyEvaluation {
    fn blocked(reason: &str) -> Self {
        Self {
            status: PolicyStatus::Blocked,
            execution: None,
            reasons: vec![reason.to_string()],
            warnings: Vec::new(),
        }
    }

    fn cpu_only(warnings: Vec<String>) -> Self {
        Self {
            status: PolicyStatus::Limited,
            execution: Some(ExecutionPlan {
                preferred: ExecutionTarget::Cpu,
                fallback: None,
            }),
            reasons: Vec::new(),
            warnings,
        }
    }
}

/// Evaluates local execution admission. First matching rule wins:
///
/// 1. free RAM below [`MIN_RAM_SAFE_GB`] blocks unconditionally;
/// 2. a GPU with at least [`MIN_VRAM_GB`] free VRAM is approved (gpu, then cpu);
/// 3. a GPU short on VRAM only adds a warning;
/// 4. darwin is limited to cpu since its metrics are approximate;
/// 5. [`MIN_CPU_CORES_CPU_ONLY`] cores with [`MIN_RAM_CPU_ONLY_GB`] free RAM is limited to cpu;
/// 6. anything else is blocked.
///
/// Missing facts count as zero or absent.
pub fn evaluate(facts: &SystemFacts) -> PolicyEvaluation {
    let ram_free = facts.memory.free_gb.unwrap_or(0.0);
    let cpu_cores = facts.cpu.cores.unwrap_or(0);
    let has_gpu = facts.gpu.present;
    let vram_free = facts.gpu.vram_free_gb.unwrap_or(0.0);
    let platform_os = facts.platform.os.as_deref();
    tracing::debug!(ram_free, cpu_cores, has_gpu, vram_free, ?platform_os, "evaluating local policy");

    if ram_free < MIN_RAM_SAFE_GB {
        return PolicyEvaluation::blocked("Insufficient free system RAM");
    }

    if has_gpu && vram_free >= MIN_VRAM_GB {
        return PolicyEvaluation {
            status: PolicyStatus::Approved,
            execution: Some(ExecutionPlan {
                preferred: ExecutionTarget::Gpu,
                fallback: Some(ExecutionTarget::Cpu),
            }),
            reasons: Vec::new(),
            warnings: Vec::new(),
        };
    }

    let mut warnings = Vec::new();
    if has_gpu {
        warnings.push(format!(
            "GPU detected but insufficient free VRAM ({vram_free} GB available, {MIN_VRAM_GB} GB required)."
        ));
    }

    if platform_os == Some(DARWIN_OS) {
        warnings.push("macOS detected: memory and GPU metrics are approximate.".to_string());
        warnings.push("CPU-only execution enabled. Performance may be limited.".to_string());
        return PolicyEvaluation::cpu_only(warnings);
    }

    if cpu_cores >= MIN_CPU_CORES_CPU_ONLY && ram_free >= MIN_RAM_CPU_ONLY_GB {
        warnings.push("CPU-only execution enabled. Performance will be limited.".to_string());
        return PolicyEvaluation::cpu_only(warnings);
    }

    PolicyEvaluation::blocked("System does not meet minimum requirements for safe execution.")
}
