//! Canonical workspace path construction.
//!
//! Every on-disk location the engine touches is derived here and nowhere
//! else. The resolver is a pure function of its inputs; it never performs
//! I/O, so it can be shared freely across components and tests.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};

use crate::{
    error::{Result, TaskError},
    models::{Task, TaskStatus},
};

/// Year-month bucket an archived task is filed under, e.g. `2024-02`.
///
/// Always computed from `completed_at`; the month is a routing detail of
/// the path layer and is never persisted as part of the task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveMonth {
    pub year: i32,
    pub month: u32,
}

impl ArchiveMonth {
    pub fn from_datetime(at: &DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }
}

impl std::fmt::Display for ArchiveMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Maps agents, tasks and messages to workspace paths.
///
/// Layout contract:
///
/// ```text
/// <root>/agents/<shard>/<agent_id>/
///   tasks/{pending,in_progress,blocked,completed}/<task_id>/
///   tasks/archive/<YYYY-MM>/<task_id>/
///   inbox/{unread,read}/<msg_id>.md
///   logs/agent.log
///   profile.json
/// ```
///
/// `<shard>` is a stable function of the agent id that caps directory
/// fanout (16 buckets from the first hash byte's high nibble).
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root all other paths live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic shard bucket for an agent id, e.g. `"d0-df"`.
    pub fn shard(agent_id: &str) -> String {
        let digest = Sha256::digest(agent_id.as_bytes());
        let hi = digest[0] >> 4;
        format!("{hi:x}0-{hi:x}f")
    }

    /// `<root>/agents/<shard>/<agent_id>`
    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root
            .join("agents")
            .join(Self::shard(agent_id))
            .join(agent_id)
    }

    /// The agent's `profile.json`.
    pub fn agent_profile(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("profile.json")
    }

    /// The agent's log file.
    pub fn agent_log(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("logs").join("agent.log")
    }

    /// Root of the agent's task tree.
    pub fn tasks_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("tasks")
    }

    /// Per-status folder holding task directories.
    ///
    /// For [`TaskStatus::Archived`] this is the `archive/` root; the
    /// year-month segment is appended by [`PathResolver::archive_dir`].
    pub fn status_dir(&self, agent_id: &str, status: TaskStatus) -> PathBuf {
        self.tasks_dir(agent_id).join(status.dir_name())
    }

    /// `tasks/archive/<YYYY-MM>` for a given month.
    pub fn archive_dir(&self, agent_id: &str, month: ArchiveMonth) -> PathBuf {
        self.status_dir(agent_id, TaskStatus::Archived)
            .join(month.to_string())
    }

    /// Directory of a live (non-archived) task under a given status.
    pub fn task_dir_for_status(
        &self,
        agent_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> PathBuf {
        debug_assert!(status != TaskStatus::Archived);
        self.status_dir(agent_id, status).join(task_id)
    }

    /// Directory of an archived task, filed by completion month.
    pub fn archived_task_dir(
        &self,
        agent_id: &str,
        task_id: &str,
        month: ArchiveMonth,
    ) -> PathBuf {
        self.archive_dir(agent_id, month).join(task_id)
    }

    /// Compressed artifact replacing an archived task directory.
    pub fn archived_task_artifact(
        &self,
        agent_id: &str,
        task_id: &str,
        month: ArchiveMonth,
    ) -> PathBuf {
        self.archive_dir(agent_id, month)
            .join(format!("{task_id}.tar.gz"))
    }

    /// Canonical directory for a task row.
    ///
    /// Fails with `InvariantViolated` for an archived row without
    /// `completed_at`, which no committed row should ever exhibit.
    pub fn task_dir(&self, task: &Task) -> Result<PathBuf> {
        match task.status {
            TaskStatus::Archived => {
                let completed_at = task.completed_at.ok_or_else(|| {
                    TaskError::InvariantViolated(format!(
                        "archived task '{}' has no completed_at",
                        task.id
                    ))
                })?;
                let month = ArchiveMonth::from_datetime(&completed_at);
                Ok(self.archived_task_dir(&task.agent_id, &task.id, month))
            }
            status => Ok(self.task_dir_for_status(&task.agent_id, &task.id, status)),
        }
    }

    /// Candidate locations probed by the directory search fallback, in
    /// probe order. Excludes the archive tree.
    pub fn task_dir_candidates(&self, agent_id: &str, task_id: &str) -> Vec<PathBuf> {
        [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Completed,
        ]
        .into_iter()
        .map(|status| self.task_dir_for_status(agent_id, task_id, status))
        .collect()
    }

    /// Directory of the agent's analyzer snapshots. The lifecycle core
    /// never reads or writes these; the path lives here so that no other
    /// component constructs workspace paths.
    pub fn analyses_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("analyses")
    }

    /// File for one analyzer snapshot, named by a filesystem-safe ISO
    /// timestamp.
    pub fn analysis_file(&self, agent_id: &str, at: &DateTime<Utc>) -> PathBuf {
        let stamp = at.format("%Y-%m-%dT%H-%M-%S%.3fZ");
        self.analyses_dir(agent_id).join(format!("{stamp}.json"))
    }

    /// Unread inbox body for a message id.
    pub fn inbox_unread(&self, agent_id: &str, msg_id: &str) -> PathBuf {
        self.agent_dir(agent_id)
            .join("inbox")
            .join("unread")
            .join(format!("{msg_id}.md"))
    }

    /// Read inbox body for a message id.
    pub fn inbox_read(&self, agent_id: &str, msg_id: &str) -> PathBuf {
        self.agent_dir(agent_id)
            .join("inbox")
            .join("read")
            .join(format!("{msg_id}.md"))
    }
}
