use thiserror::Error;

pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Failures raised while moving a node from preboot into a running topology.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A phase invariant was broken (wrong phase, missing markers).
    #[error("sequence violation: {0}")]
    SequenceViolation(String),
    /// Handoff attempted twice or with an inconsistent launch context.
    #[error("authority violation: {0}")]
    AuthorityViolation(String),
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
    #[error("failed to spawn {component}: {source}")]
    Spawn {
        component: String,
        #[source]
        source: std::io::Error,
    },
    /// Duplicate commit, runtime directory, or lock owner.
    #[error("collision: {0}")]
    Collision(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BootstrapError {
    pub fn spawn(component: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            component: component.into(),
            source,
        }
    }

    /// Conflicts are reported to the caller; the serving process keeps running.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Collision(_))
    }

    /// Stable machine-readable code used in API envelopes and event logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SequenceViolation(_) => "sequence_violation",
            Self::AuthorityViolation(_) => "authority_violation",
            Self::InvalidDecision(_) => "invalid_decision",
            Self::PolicyViolation(_) => "policy_violation",
            Self::Lifecycle(_) => "lifecycle_error",
            Self::Spawn { .. } => "spawn_error",
            Self::Collision(_) => "collision",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}
