use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{Message, NewMessage, NewTask, Task, TaskStatus, TransitionExtras},
};

/// Durable task persistence with optimistic concurrency.
///
/// Implementations must be thread-safe; every method is a single atomic
/// unit against the backing store. Mutating methods take the caller's
/// `expected_version` and fail with `TaskError::VersionMismatch` when the
/// row has moved on, which is the only concurrency-control mechanism —
/// callers retry after a re-read.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a new task in `Pending` at version 1.
    ///
    /// Derives `depth` and `task_path` from the parent row and increments
    /// the parent's `subtasks_total` in the same transaction.
    ///
    /// # Errors
    /// * `TaskError::ParentNotFound` - a parent id was given but missing
    /// * `TaskError::Database` - the store operation failed
    async fn create(&self, task: NewTask) -> Result<Task>;

    /// Fetch a task by id.
    async fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Atomically move a task to `target` status.
    ///
    /// Re-reads the row inside the transaction; verifies the version and
    /// the status machine; writes the new row with `version + 1`,
    /// status-specific timestamps (`started_at` on first entry into
    /// `InProgress`, `completed_at` on `Completed`) and clears
    /// `blocked_by` when leaving `Blocked`.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound` - no such task
    /// * `TaskError::VersionMismatch` - the row's version moved on
    /// * `TaskError::InvalidTransition` - illegal per the status machine
    async fn transition(
        &self,
        id: &str,
        expected_version: i64,
        target: TaskStatus,
        extras: TransitionExtras,
    ) -> Result<Task>;

    /// Hand execution of a task to another agent.
    ///
    /// Sets `delegated_to`/`delegated_at` and bumps the version; the
    /// owning `agent_id` and the status are unchanged.
    async fn delegate(&self, id: &str, expected_version: i64, delegate_to: &str) -> Result<Task>;

    /// Replace the wait-for set of a blocked task (versioned mutation).
    ///
    /// Used when blockers resolve one at a time; the status stays
    /// `Blocked` until the coordinator's unblock operation observes an
    /// empty set.
    async fn set_blocked_by(
        &self,
        id: &str,
        expected_version: i64,
        blocked_by: BTreeSet<String>,
    ) -> Result<Task>;

    /// Update the rollup counters of a parent task (versioned mutation).
    async fn update_progress(
        &self,
        id: &str,
        expected_version: i64,
        subtasks_completed: i32,
        percent_complete: i32,
    ) -> Result<Task>;

    /// Record an execution pickup: stamps `last_executed` and increments
    /// `execution_count` (versioned mutation).
    async fn record_execution(&self, id: &str, expected_version: i64) -> Result<Task>;

    /// Completed tasks, optionally restricted to those completed strictly
    /// before `older_than`.
    async fn list_completed(&self, older_than: Option<DateTime<Utc>>) -> Result<Vec<Task>>;

    /// Archived tasks completed strictly before `older_than`.
    async fn list_archived(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Every task currently in `Blocked`.
    async fn list_blocked(&self) -> Result<Vec<Task>>;

    /// Direct children of a parent task.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<Task>>;

    /// Number of direct children whose status is `Completed` or
    /// `Archived`; the input of the parent rollup.
    async fn count_completed_children(&self, parent_id: &str) -> Result<i32>;
}

/// Append-only notification index.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Index a message whose body has already been written to the
    /// recipient's inbox. Stamps the send timestamp; `read` starts false.
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    /// Fetch a message by id.
    async fn get(&self, id: &str) -> Result<Option<Message>>;

    /// Flip a message to read and return the updated row. Idempotent:
    /// flipping an already-read message is a no-op, not an error.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound` - no message with that id
    async fn mark_read(&self, id: &str) -> Result<Message>;

    /// Messages addressed to an agent, newest first.
    async fn list_for(&self, agent_id: &str, unread_only: bool) -> Result<Vec<Message>>;

    /// All messages of a thread in send order.
    async fn list_thread(&self, thread_id: &str) -> Result<Vec<Message>>;

    /// Number of unread messages for an agent.
    async fn unread_count(&self, agent_id: &str) -> Result<i64>;
}

/// Read-only view of the organizational hierarchy.
///
/// The lifecycle core never writes this relation; it is maintained by the
/// surrounding system.
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// The agent's direct manager, if any.
    async fn manager_of(&self, agent_id: &str) -> Result<Option<String>>;

    /// Agents reporting directly to the given agent.
    async fn subordinates_of(&self, agent_id: &str) -> Result<Vec<String>>;
}
