//! Lifecycle coordinator: composes store transitions with workspace moves
//! and notifications.
//!
//! Every operation follows the same skeleton: store transition first, then
//! the filesystem move, then notifications. The store is the source of
//! truth; a filesystem failure after a committed transition is logged and
//! surfaced but never rolled back, and [`LifecycleCoordinator::reconcile`]
//! repairs the drift on the next touch.

use std::collections::BTreeSet;
use std::sync::Arc;

use cadre_core::{
    error::{Result, TaskError},
    models::{rollup_percent, NewTask, Priority, Task, TaskStatus, TransitionExtras},
    repository::TaskStore,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    agents::AgentDirectory,
    messaging::{completion_notification, delegation_notification, MessageBus},
    workspace::{TaskNarrative, WorkspaceMaterializer},
};

/// Base delay before a rollup retry; a small random jitter is added.
const ROLLUP_BACKOFF_MS: u64 = 10;

/// Request payload for creating a task.
#[derive(Debug, Clone, Default)]
pub struct CreateTask {
    /// Explicit id; a v4 UUID is minted when absent
    pub id: Option<String>,
    pub agent_id: String,
    pub title: String,
    pub priority: Priority,
    pub parent_task_id: Option<String>,
    pub narrative: TaskNarrative,
}

impl CreateTask {
    pub fn new(agent_id: impl Into<String>, title: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: None,
            agent_id: agent_id.into(),
            title: title.into(),
            priority,
            parent_task_id: None,
            narrative: TaskNarrative::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn with_narrative(mut self, narrative: TaskNarrative) -> Self {
        self.narrative = narrative;
        self
    }
}

/// Atomic lifecycle operations over the task store and workspace.
pub struct LifecycleCoordinator {
    store: Arc<dyn TaskStore>,
    workspace: WorkspaceMaterializer,
    bus: MessageBus,
    agents: Arc<AgentDirectory>,
    rollup_max_attempts: u32,
}

impl LifecycleCoordinator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        workspace: WorkspaceMaterializer,
        bus: MessageBus,
        agents: Arc<AgentDirectory>,
        rollup_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            workspace,
            bus,
            agents,
            rollup_max_attempts,
        }
    }

    /// Create a task in `Pending` and materialize its workspace directory.
    pub async fn create(&self, request: CreateTask, ct: &CancellationToken) -> Result<Task> {
        ensure_live(ct, "cancelled before create committed")?;

        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut new_task = NewTask::new(id, request.agent_id, request.title, request.priority);
        new_task.parent_task_id = request.parent_task_id;

        let task = self.store.create(new_task).await?;
        tracing::info!(task_id = %task.id, agent_id = %task.agent_id, "task created");

        ensure_live(
            ct,
            "cancelled after create committed; workspace left for reconciliation",
        )?;
        self.workspace.materialize(&task, &request.narrative).await?;
        Ok(task)
    }

    /// Move a task into `InProgress` and relocate its directory.
    pub async fn start(&self, id: &str, version: i64, ct: &CancellationToken) -> Result<Task> {
        self.transition_and_relocate(id, version, TaskStatus::InProgress, Default::default(), ct)
            .await
    }

    /// Block a task on a non-empty set of other tasks.
    pub async fn block(
        &self,
        id: &str,
        version: i64,
        blocked_by: BTreeSet<String>,
        ct: &CancellationToken,
    ) -> Result<Task> {
        self.transition_and_relocate(
            id,
            version,
            TaskStatus::Blocked,
            TransitionExtras::blocked_on(blocked_by),
            ct,
        )
        .await
    }

    /// Resume a blocked task. Requires the wait-for set to have drained.
    pub async fn unblock(&self, id: &str, version: i64, ct: &CancellationToken) -> Result<Task> {
        let current = self.fetch(id).await?;
        if !current.blocked_by.is_empty() {
            return Err(TaskError::InvariantViolated(format!(
                "task '{id}' still waits on {} task(s)",
                current.blocked_by.len()
            )));
        }
        self.transition_and_relocate(id, version, TaskStatus::InProgress, Default::default(), ct)
            .await
    }

    /// Hand a task to another agent and notify them.
    ///
    /// The delegatee must have a profile. The notification honors the
    /// recipient's `notifyOnDelegation` preference unless `force` is set;
    /// a notification failure never fails the delegation.
    pub async fn delegate(
        &self,
        id: &str,
        version: i64,
        delegatee: &str,
        force: bool,
        ct: &CancellationToken,
    ) -> Result<Task> {
        ensure_live(ct, "cancelled before delegate committed")?;
        let profile = self.agents.profile(delegatee).await?;

        let task = self.store.delegate(id, version, delegatee).await?;
        tracing::info!(task_id = %task.id, delegatee, "task delegated");

        ensure_live(ct, "cancelled after delegate committed")?;
        if force || profile.communication_preferences.notify_on_delegation {
            let sender = self.agents.display_name(&task.agent_id).await;
            let notification = delegation_notification(&sender, &task, delegatee);
            if let Err(err) = self.bus.send(notification).await {
                tracing::warn!(task_id = %task.id, error = %err, "delegation notification failed");
            }
        }
        Ok(task)
    }

    /// Complete a task: transition, relocate the directory (with search
    /// fallback), roll progress up the ancestry and notify owners.
    pub async fn complete(&self, id: &str, version: i64, ct: &CancellationToken) -> Result<Task> {
        ensure_live(ct, "cancelled before complete committed")?;
        let before = self.fetch(id).await?;

        let task = self
            .store
            .transition(id, version, TaskStatus::Completed, Default::default())
            .await?;
        tracing::info!(task_id = %task.id, "task completed");

        ensure_live(
            ct,
            "cancelled after complete committed; workspace left for reconciliation",
        )?;
        if let Err(err) = self.workspace.relocate(&task, before.status).await {
            tracing::error!(task_id = %task.id, error = %err, "workspace move failed after completion commit");
            return Err(err);
        }

        self.rollup(&task, ct).await?;
        Ok(task)
    }

    /// Archive a completed task: transition, then move the directory into
    /// its `archive/<YYYY-MM>/` bucket.
    pub async fn archive(&self, id: &str, version: i64, ct: &CancellationToken) -> Result<Task> {
        self.transition_and_relocate(id, version, TaskStatus::Archived, Default::default(), ct)
            .await
    }

    /// Record an execution pickup on a task (versioned mutation).
    pub async fn record_execution(
        &self,
        id: &str,
        version: i64,
        ct: &CancellationToken,
    ) -> Result<Task> {
        ensure_live(ct, "cancelled before execution was recorded")?;
        self.store.record_execution(id, version).await
    }

    /// Repair workspace drift for a task: if its canonical directory is
    /// missing, recover it from a sibling status folder or re-materialize
    /// it from the store projection.
    pub async fn reconcile(&self, id: &str, ct: &CancellationToken) -> Result<Task> {
        ensure_live(ct, "cancelled before reconciliation")?;
        let task = self.fetch(id).await?;
        let dir = self.workspace.resolver().task_dir(&task)?;

        if tokio::fs::metadata(&dir).await.is_ok() {
            self.workspace.write_context(&task).await?;
            return Ok(task);
        }

        let candidates = self
            .workspace
            .resolver()
            .task_dir_candidates(&task.agent_id, &task.id);
        let outcome = crate::fsio::move_dir_or_search(&dir, &dir, &candidates).await?;
        tracing::info!(task_id = %task.id, ?outcome, "workspace reconciled");

        match outcome {
            crate::fsio::MoveOutcome::CreatedEmpty => {
                self.workspace
                    .materialize(&task, &TaskNarrative::default())
                    .await?
            }
            _ => self.workspace.write_context(&task).await?,
        }
        Ok(task)
    }

    async fn fetch(&self, id: &str) -> Result<Task> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TaskError::task_not_found(id))
    }

    async fn transition_and_relocate(
        &self,
        id: &str,
        version: i64,
        target: TaskStatus,
        extras: TransitionExtras,
        ct: &CancellationToken,
    ) -> Result<Task> {
        ensure_live(ct, "cancelled before transition committed")?;
        let before = self.fetch(id).await?;

        let task = self.store.transition(id, version, target, extras).await?;
        tracing::info!(task_id = %task.id, from = %before.status, to = %task.status, "task transitioned");

        ensure_live(
            ct,
            "cancelled after transition committed; workspace left for reconciliation",
        )?;
        if let Err(err) = self.workspace.relocate(&task, before.status).await {
            tracing::error!(task_id = %task.id, error = %err, "workspace move failed after transition commit");
            return Err(err);
        }
        Ok(task)
    }

    /// Propagate a child's completion up the ancestry.
    ///
    /// For each ancestor with subtasks the completed-child count and the
    /// derived percentage are recomputed; each write is a versioned
    /// mutation retried a bounded number of times on `VersionMismatch`.
    /// The walk only ever goes upward, so concurrent rollups cannot
    /// deadlock. Owner notifications are best-effort.
    async fn rollup(&self, completed: &Task, ct: &CancellationToken) -> Result<()> {
        let mut next_parent = completed.parent_task_id.clone();

        while let Some(parent_id) = next_parent {
            ensure_live(ct, "cancelled during parent rollup")?;

            let Some(parent) = self.refresh_parent(&parent_id, ct).await? else {
                tracing::warn!(parent_id, "rollup ancestor vanished mid-walk");
                break;
            };

            let prefs = self.agents.preferences(&parent.agent_id).await;
            if prefs.notify_on_completion {
                let sender = self.agents.display_name(&completed.agent_id).await;
                let notification = completion_notification(&sender, completed, &parent.agent_id);
                if let Err(err) = self.bus.send(notification).await {
                    tracing::warn!(
                        parent_id = %parent.id,
                        error = %err,
                        "completion notification failed"
                    );
                }
            }

            next_parent = parent.parent_task_id;
        }
        Ok(())
    }

    /// Recompute one ancestor's counters with bounded optimistic retries.
    /// Returns `None` when the ancestor no longer exists.
    async fn refresh_parent(
        &self,
        parent_id: &str,
        ct: &CancellationToken,
    ) -> Result<Option<Task>> {
        let mut attempts = 0u32;
        loop {
            ensure_live(ct, "cancelled during parent rollup")?;

            let Some(parent) = self.store.get(parent_id).await? else {
                return Ok(None);
            };
            if parent.subtasks_total == 0 {
                return Ok(Some(parent));
            }

            let completed = self.store.count_completed_children(parent_id).await?;
            let percent = rollup_percent(completed, parent.subtasks_total);
            if completed == parent.subtasks_completed && percent == parent.percent_complete {
                return Ok(Some(parent));
            }

            match self
                .store
                .update_progress(parent_id, parent.version, completed, percent)
                .await
            {
                Ok(updated) => {
                    tracing::debug!(
                        parent_id,
                        completed,
                        percent,
                        "parent progress rolled up"
                    );
                    return Ok(Some(updated));
                }
                Err(err) if err.is_version_mismatch() => {
                    attempts += 1;
                    if attempts >= self.rollup_max_attempts {
                        tracing::error!(parent_id, attempts, "rollup retries exhausted");
                        return Err(err);
                    }
                    let jitter = {
                        use rand::Rng;
                        rand::thread_rng().gen_range(0..ROLLUP_BACKOFF_MS)
                    };
                    tokio::time::sleep(std::time::Duration::from_millis(
                        ROLLUP_BACKOFF_MS + jitter,
                    ))
                    .await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn ensure_live(ct: &CancellationToken, detail: &str) -> Result<()> {
    if ct.is_cancelled() {
        return Err(TaskError::interrupted(detail));
    }
    Ok(())
}
