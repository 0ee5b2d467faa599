use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable unit of work owned by an agent.
///
/// A task moves through a five-state lifecycle and mirrors its state as a
/// workspace directory on disk. Every committed mutation bumps `version`,
/// which is the optimistic-concurrency token callers must present when
/// requesting further mutations.
///
/// # Examples
///
/// ```rust
/// use cadre_core::models::TaskStatus;
///
/// assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
/// assert!(!TaskStatus::Archived.can_transition_to(TaskStatus::Pending));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Stable unique identifier
    pub id: String,
    /// Owning agent; unchanged by delegation
    pub agent_id: String,
    /// Brief task title
    pub title: String,
    /// Scheduling priority
    pub priority: Priority,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Creation timestamp (millisecond precision)
    pub created_at: DateTime<Utc>,
    /// Set on first entry into `InProgress`
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when the task completes
    pub completed_at: Option<DateTime<Utc>>,
    /// Parent task for hierarchical structures
    pub parent_task_id: Option<String>,
    /// Distance from the root of the hierarchy; 0 iff no parent
    pub depth: i32,
    /// Current executor when the task has been handed off
    pub delegated_to: Option<String>,
    /// When the current delegation happened
    pub delegated_at: Option<DateTime<Utc>>,
    /// Integer percentage in [0, 100]
    pub percent_complete: i32,
    /// Children counted as completed by the parent rollup
    pub subtasks_completed: i32,
    /// Number of child tasks
    pub subtasks_total: i32,
    /// Task ids this task waits on; non-empty only while `Blocked`
    pub blocked_by: BTreeSet<String>,
    /// When the task entered `Blocked`
    pub blocked_since: Option<DateTime<Utc>>,
    /// Human-readable ancestry string, informational only
    pub task_path: String,
    /// Optimistic-concurrency token, starts at 1 and strictly increases
    pub version: i64,
    /// Timestamp of the last committed mutation
    pub last_updated: DateTime<Utc>,
    /// When an executor last picked the task up
    pub last_executed: Option<DateTime<Utc>>,
    /// How many times the task has been executed
    pub execution_count: i32,
}

/// Task lifecycle status.
///
/// Exactly five states; the archive year-month is *not* a status, it is
/// derived from `completed_at` by the path resolver when routing archived
/// directories.
///
/// # State transitions
///
/// - `Pending` → `InProgress`, `Blocked`, `Completed`
/// - `InProgress` → `Blocked`, `Completed`
/// - `Blocked` → `InProgress`, `Completed`
/// - `Completed` → `Archived`
/// - `Archived` → (terminal)
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet started
    Pending,
    /// Actively being worked on
    InProgress,
    /// Waiting on other tasks
    Blocked,
    /// Finished; eligible for archival
    Completed,
    /// Retired for audit; terminal
    Archived,
}

impl TaskStatus {
    /// Check whether the status machine allows moving to `target`.
    pub fn can_transition_to(self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, target) {
            // Re-entering the current status is never a transition
            (current, new) if current == new => false,

            (Pending, InProgress | Blocked | Completed) => true,
            (InProgress, Blocked | Completed) => true,
            (Blocked, InProgress | Completed) => true,
            (Completed, Archived) => true,

            // Archived is terminal
            (Archived, _) => false,

            _ => false,
        }
    }

    /// Directory name used for the per-status workspace folders.
    ///
    /// `Archived` has no single folder; archived tasks live under
    /// `archive/<YYYY-MM>/`, resolved by [`crate::paths::PathResolver`].
    pub fn dir_name(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Archived => "archive",
        }
    }

    /// Whether no further status change is legal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Archived)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Task scheduling priority.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Notification priority on the message bus.
///
/// Distinct from [`Priority`]: tasks have no `normal`, messages have no
/// `medium`.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl From<Priority> for MessagePriority {
    /// Mapping used when a notification originates from a task event:
    /// `urgent → urgent`, `high → high`, everything else `normal`.
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Urgent => MessagePriority::Urgent,
            Priority::High => MessagePriority::High,
            Priority::Medium | Priority::Low => MessagePriority::Normal,
        }
    }
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessagePriority::Urgent => write!(f, "urgent"),
            MessagePriority::High => write!(f, "high"),
            MessagePriority::Normal => write!(f, "normal"),
            MessagePriority::Low => write!(f, "low"),
        }
    }
}

/// Data transfer object for creating new tasks.
///
/// `depth`, `task_path` and the subtask counters are derived by the store
/// from the parent row; callers only name the parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    /// Caller-assigned stable identifier
    pub id: String,
    /// Owning agent
    pub agent_id: String,
    /// Brief task title
    pub title: String,
    /// Scheduling priority
    pub priority: Priority,
    /// Parent task for hierarchical structures
    pub parent_task_id: Option<String>,
}

impl NewTask {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        title: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            title: title.into(),
            priority,
            parent_task_id: None,
        }
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }
}

/// Status-specific payload accompanying a transition request.
///
/// Only a transition into `Blocked` carries data today; the struct keeps the
/// store signature stable as further statuses grow payloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionExtras {
    /// Wait-for set installed when entering `Blocked`
    pub blocked_by: Option<BTreeSet<String>>,
}

impl TransitionExtras {
    /// Extras for a transition into `Blocked`.
    pub fn blocked_on(blocked_by: BTreeSet<String>) -> Self {
        Self {
            blocked_by: Some(blocked_by),
        }
    }
}

/// Notification record indexed in the store.
///
/// The rendered body lives in the recipient's inbox on disk; `body_path`
/// points at it. Rows are append-only and `read` flips are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Stable unique identifier
    pub id: String,
    /// Sending agent
    pub from_agent: String,
    /// Receiving agent
    pub to_agent: String,
    /// When the message was sent
    pub timestamp: DateTime<Utc>,
    /// Notification priority
    pub priority: MessagePriority,
    /// Delivery channel, e.g. `internal`
    pub channel: String,
    /// Whether the recipient has read the message
    pub read: bool,
    /// Whether the recipient must act
    pub action_required: bool,
    /// Short subject line
    pub subject: String,
    /// Groups related messages, e.g. `task-<id>` or a deadlock cycle key
    pub thread_id: String,
    /// Where the rendered body was written in the recipient's inbox
    pub body_path: String,
}

/// Data transfer object for indexing a freshly written message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub priority: MessagePriority,
    pub channel: String,
    pub action_required: bool,
    pub subject: String,
    pub thread_id: String,
    pub body_path: String,
}

/// Per-agent notification opt-outs.
///
/// Every flag defaults to `true` when the profile omits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationPreferences {
    #[serde(default = "default_true")]
    pub notify_on_delegation: bool,
    #[serde(default = "default_true")]
    pub notify_on_completion: bool,
    #[serde(default = "default_true")]
    pub notify_on_deadlock: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CommunicationPreferences {
    fn default() -> Self {
        Self {
            notify_on_delegation: true,
            notify_on_completion: true,
            notify_on_deadlock: true,
        }
    }
}

/// Agent identity as the lifecycle core sees it: read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    /// Agent identifier
    pub id: String,
    /// Human-readable display name
    pub display_name: String,
    /// Manager in the organizational hierarchy, if any
    #[serde(default)]
    pub reporting_to: Option<String>,
    /// Notification opt-outs
    #[serde(default)]
    pub communication_preferences: CommunicationPreferences,
}

/// Compute the rollup percentage: `round(100 * completed / total)`.
///
/// Returns 0 when `total` is 0; the caller keeps `percent_complete`
/// manually maintained for leaf tasks.
pub fn rollup_percent(completed: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    (100.0 * completed as f64 / total as f64).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses() -> [TaskStatus; 5] {
        [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Completed,
            TaskStatus::Archived,
        ]
    }

    #[test]
    fn test_valid_status_transitions() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Blocked));
        assert!(Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Archived));

        assert!(InProgress.can_transition_to(Blocked));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Archived));

        assert!(Blocked.can_transition_to(InProgress));
        assert!(Blocked.can_transition_to(Completed));
        assert!(!Blocked.can_transition_to(Pending));
        assert!(!Blocked.can_transition_to(Archived));

        assert!(Completed.can_transition_to(Archived));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Blocked));

        for target in statuses() {
            assert!(!Archived.can_transition_to(target));
        }
    }

    #[test]
    fn test_no_same_status_transition() {
        for status in statuses() {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_status_dir_names() {
        assert_eq!(TaskStatus::Pending.dir_name(), "pending");
        assert_eq!(TaskStatus::InProgress.dir_name(), "in_progress");
        assert_eq!(TaskStatus::Blocked.dir_name(), "blocked");
        assert_eq!(TaskStatus::Completed.dir_name(), "completed");
        assert_eq!(TaskStatus::Archived.dir_name(), "archive");
    }

    #[test]
    fn test_message_priority_mapping() {
        assert_eq!(
            MessagePriority::from(Priority::Urgent),
            MessagePriority::Urgent
        );
        assert_eq!(MessagePriority::from(Priority::High), MessagePriority::High);
        assert_eq!(
            MessagePriority::from(Priority::Medium),
            MessagePriority::Normal
        );
        assert_eq!(MessagePriority::from(Priority::Low), MessagePriority::Normal);
    }

    #[test]
    fn test_rollup_percent() {
        assert_eq!(rollup_percent(0, 0), 0);
        assert_eq!(rollup_percent(0, 3), 0);
        assert_eq!(rollup_percent(1, 3), 33);
        assert_eq!(rollup_percent(2, 3), 67);
        assert_eq!(rollup_percent(3, 3), 100);
        assert_eq!(rollup_percent(1, 2), 50);
    }

    #[test]
    fn test_preferences_default_to_opt_in() {
        let prefs: CommunicationPreferences = serde_json::from_str("{}").unwrap();
        assert!(prefs.notify_on_delegation);
        assert!(prefs.notify_on_completion);
        assert!(prefs.notify_on_deadlock);

        let prefs: CommunicationPreferences =
            serde_json::from_str(r#"{"notifyOnDelegation": false}"#).unwrap();
        assert!(!prefs.notify_on_delegation);
        assert!(prefs.notify_on_completion);
    }

    #[test]
    fn test_profile_minimal_json() {
        let profile: AgentProfile =
            serde_json::from_str(r#"{"id": "dev-001", "display_name": "Dev One"}"#).unwrap();
        assert_eq!(profile.id, "dev-001");
        assert!(profile.reporting_to.is_none());
        assert!(profile.communication_preferences.notify_on_deadlock);
    }

    #[test]
    fn test_status_serde_round_trip() {
        for status in statuses() {
            let json = serde_json::to_string(&status).unwrap();
            let back: TaskStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
