//! Typed phase markers handed from the committing preboot process to the
//! runtime controller through the child's environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::errors::{BootstrapError, BootstrapResult};

pub const LAUNCH_DIR_ENV: &str = "HEARTH_LAUNCH_DIR";
pub const LAUNCH_ID_ENV: &str = "HEARTH_LAUNCH_ID";
pub const RUNTIME_DIR_ENV: &str = "HEARTH_RUNTIME_DIR";
pub const RUNTIME_ID_ENV: &str = "HEARTH_RUNTIME_ID";
pub const PHASE_ENV: &str = "HEARTH_PHASE";

pub const RUNTIME_DIR_NAME: &str = "runtime";
pub const DECISION_FILE_NAME: &str = "decision.json";

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Preboot,
    Runtime,
}

impl ExecutionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preboot => "preboot",
            Self::Runtime => "runtime",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "preboot" => Some(Self::Preboot),
            "runtime" => Some(Self::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns an 8-character lowercase hex id that is unique within this process.
pub fn short_hex_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    hasher.update(nanos.to_le_bytes());
    hasher.update(ID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher
        .finalize()
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Launch-scoped markers. Write-once per launch: runtime markers may only be
/// set by the commit that creates the runtime directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchContext {
    pub launch_dir: Option<PathBuf>,
    pub launch_id: Option<String>,
    pub runtime_dir: Option<PathBuf>,
    pub runtime_id: Option<String>,
    pub phase: Option<ExecutionPhase>,
}

impl LaunchContext {
    pub fn for_preboot(launch_dir: impl Into<PathBuf>, launch_id: impl Into<String>) -> Self {
        Self {
            launch_dir: Some(launch_dir.into()),
            launch_id: Some(launch_id.into()),
            runtime_dir: None,
            runtime_id: None,
            phase: Some(ExecutionPhase::Preboot),
        }
    }

    /// Reads markers from the current process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads markers through `lookup`; blank values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            launch_dir: read(LAUNCH_DIR_ENV).map(PathBuf::from),
            launch_id: read(LAUNCH_ID_ENV),
            runtime_dir: read(RUNTIME_DIR_ENV).map(PathBuf::from),
            runtime_id: read(RUNTIME_ID_ENV),
            phase: read(PHASE_ENV).and_then(|raw| ExecutionPhase::parse(&raw)),
        }
    }

    /// True once any runtime-identifying marker is present.
    pub fn has_runtime_markers(&self) -> bool {
        self.runtime_dir.is_some() || self.runtime_id.is_some()
    }

    /// Path of the runtime directory this launch would create.
    pub fn planned_runtime_dir(&self) -> BootstrapResult<PathBuf> {
        let launch_dir = self.launch_dir.as_ref().ok_or_else(|| {
            BootstrapError::SequenceViolation(format!("{LAUNCH_DIR_ENV} is not set"))
        })?;
        Ok(launch_dir.join(RUNTIME_DIR_NAME))
    }

    /// Records the freshly created runtime directory and flips the phase.
    pub fn enter_runtime(&mut self, runtime_dir: &Path) -> BootstrapResult<String> {
        if self.has_runtime_markers() {
            return Err(BootstrapError::AuthorityViolation(
                "runtime markers are already set for this launch".to_string(),
            ));
        }
        let runtime_id = match &self.launch_id {
            Some(launch_id) => format!("{launch_id}-{}", short_hex_id()),
            None => format!("runtime-{}", short_hex_id()),
        };
        self.runtime_dir = Some(runtime_dir.to_path_buf());
        self.runtime_id = Some(runtime_id.clone());
        self.phase = Some(ExecutionPhase::Runtime);
        Ok(runtime_id)
    }

    /// Environment pairs to pass to a child process.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::new();
        if let Some(dir) = &self.launch_dir {
            vars.push((LAUNCH_DIR_ENV, dir.display().to_string()));
        }
        if let Some(id) = &self.launch_id {
            vars.push((LAUNCH_ID_ENV, id.clone()));
        }
        if let Some(dir) = &self.runtime_dir {
            vars.push((RUNTIME_DIR_ENV, dir.display().to_string()));
        }
        if let Some(id) = &self.runtime_id {
            vars.push((RUNTIME_ID_ENV, id.clone()));
        }
        if let Some(phase) = self.phase {
            vars.push((PHASE_ENV, phase.as_str().to_string()));
        }
        vars
    }

    /// Validates markers on receipt in the runtime controller and returns the
    /// runtime directory.
    pub fn validate_runtime(&self) -> BootstrapResult<PathBuf> {
        if self.phase != Some(ExecutionPhase::Runtime) {
            return Err(BootstrapError::SequenceViolation(format!(
                "runtime controller requires {PHASE_ENV}=runtime (found {})",
                self.phase.map(ExecutionPhase::as_str).unwrap_or("<unset>")
            )));
        }
        let runtime_dir = self.runtime_dir.clone().ok_or_else(|| {
            BootstrapError::SequenceViolation(format!("{RUNTIME_DIR_ENV} is not set"))
        })?;
        if self.runtime_id.is_none() {
            return Err(BootstrapError::SequenceViolation(format!(
                "{RUNTIME_ID_ENV} is not set"
            )));
        }
        if let Some(launch_dir) = &self.launch_dir {
            if runtime_dir != launch_dir.join(RUNTIME_DIR_NAME) {
                return Err(BootstrapError::AuthorityViolation(format!(
                    "runtime dir {} does not belong to launch dir {}",
                    runtime_dir.display(),
                    launch_dir.display()
                )));
            }
        }
        if !runtime_dir.is_dir() {
            return Err(BootstrapError::SequenceViolation(format!(
                "runtime dir {} does not exist",
                runtime_dir.display()
            )));
        }
        Ok(runtime_dir)
    }
}
