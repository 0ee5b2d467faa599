use thiserror::Error;

use crate::models::TaskStatus;

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Classification of filesystem failures surfaced by workspace operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// Source path does not exist
    NotFound,
    /// Operation not permitted on the path
    PermissionDenied,
    /// No space left on the device
    DiskFull,
    /// Rename crossed a filesystem boundary
    CrossDevice,
    /// Anything else the platform reported
    Other,
}

impl FsErrorKind {
    /// Short machine-readable label for logs and error payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            FsErrorKind::NotFound => "not_found",
            FsErrorKind::PermissionDenied => "permission_denied",
            FsErrorKind::DiskFull => "disk_full",
            FsErrorKind::CrossDevice => "cross_device",
            FsErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surface of the task lifecycle engine.
///
/// Every variant carries a short machine-readable kind (see [`TaskError::kind`])
/// and renders a human-readable detail string through `Display`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// Task not found by the given identifier
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Parent named at creation does not exist
    #[error("Parent task not found: {0}")]
    ParentNotFound(String),

    /// Agent has no profile in the workspace
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Illegal status-machine transition attempted
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// Stale optimistic-concurrency token; the caller should re-read and retry
    #[error("Version mismatch on task {task_id}: expected {expected}, found {actual}")]
    VersionMismatch {
        task_id: String,
        expected: i64,
        actual: i64,
    },

    /// A committed row would break a documented invariant
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    /// Filesystem failure in a workspace operation
    #[error("Filesystem error ({kind}): {detail}")]
    Fs { kind: FsErrorKind, detail: String },

    /// Cancellation observed at an I/O boundary
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Underlying store failure
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TaskError {
    /// Create a not found error for a task id
    pub fn task_not_found(id: &str) -> Self {
        Self::TaskNotFound(format!("task with id '{id}' does not exist"))
    }

    /// Create a not found error for a missing parent
    pub fn parent_not_found(id: &str) -> Self {
        Self::ParentNotFound(format!("parent task '{id}' does not exist"))
    }

    /// Create a not found error for an agent without a profile
    pub fn agent_not_found(id: &str) -> Self {
        Self::AgentNotFound(format!("agent '{id}' has no profile"))
    }

    /// Create a transition error
    pub fn invalid_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Create a version conflict error
    pub fn version_mismatch(task_id: &str, expected: i64, actual: i64) -> Self {
        Self::VersionMismatch {
            task_id: task_id.to_string(),
            expected,
            actual,
        }
    }

    /// Create a filesystem error with a classified kind
    pub fn fs(kind: FsErrorKind, detail: impl Into<String>) -> Self {
        Self::Fs {
            kind,
            detail: detail.into(),
        }
    }

    /// Create an interruption error for a cancelled operation
    pub fn interrupted(detail: impl Into<String>) -> Self {
        Self::Interrupted(detail.into())
    }

    /// Short machine-readable kind for structured logging and callers
    /// that dispatch on error class without string matching.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::TaskNotFound(_) => "task_not_found",
            TaskError::ParentNotFound(_) => "parent_not_found",
            TaskError::AgentNotFound(_) => "agent_not_found",
            TaskError::InvalidTransition { .. } => "invalid_transition",
            TaskError::VersionMismatch { .. } => "version_mismatch",
            TaskError::InvariantViolated(_) => "invariant_violated",
            TaskError::Fs { .. } => "fs_error",
            TaskError::Interrupted(_) => "interrupted",
            TaskError::Database(_) => "database",
            TaskError::Configuration(_) => "configuration",
        }
    }

    /// Check if this error indicates a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TaskError::TaskNotFound(_) | TaskError::ParentNotFound(_) | TaskError::AgentNotFound(_)
        )
    }

    /// Check if this error is a stale-version conflict worth retrying
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, TaskError::VersionMismatch { .. })
    }

    /// Check if this error came from the filesystem layer
    pub fn is_fs(&self) -> bool {
        matches!(self, TaskError::Fs { .. })
    }

    /// Check if this error is a cancellation
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted(_))
    }
}
