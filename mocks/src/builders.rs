//! Builder pattern implementations for easy test data construction

use std::collections::BTreeSet;

use cadre_core::models::{Priority, Task, TaskStatus};
use chrono::{DateTime, Utc};

/// Fluent builder for [`Task`] instances with sensible defaults.
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: "T-test".to_string(),
                agent_id: "test-agent".to_string(),
                title: "Test Task".to_string(),
                priority: Priority::Medium,
                status: TaskStatus::Pending,
                created_at: now,
                started_at: None,
                completed_at: None,
                parent_task_id: None,
                depth: 0,
                delegated_to: None,
                delegated_at: None,
                percent_complete: 0,
                subtasks_completed: 0,
                subtasks_total: 0,
                blocked_by: BTreeSet::new(),
                blocked_since: None,
                task_path: "Test Task".to_string(),
                version: 1,
                last_updated: now,
                last_executed: None,
                execution_count: 0,
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.task.id = id.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.task.agent_id = agent_id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.task.task_path = title.clone();
        self.task.title = title;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    /// Set the status, filling in the timestamps that status implies.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        let now = Utc::now();
        match status {
            TaskStatus::InProgress => {
                self.task.started_at.get_or_insert(now);
            }
            TaskStatus::Completed | TaskStatus::Archived => {
                self.task.started_at.get_or_insert(now);
                self.task.completed_at.get_or_insert(now);
            }
            TaskStatus::Blocked => {
                self.task.blocked_since.get_or_insert(now);
            }
            TaskStatus::Pending => {}
        }
        self.task.status = status;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>, depth: i32) -> Self {
        self.task.parent_task_id = Some(parent_id.into());
        self.task.depth = depth;
        self
    }

    pub fn with_blocked_by<I, S>(mut self, blockers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task.blocked_by = blockers.into_iter().map(Into::into).collect();
        self.task.blocked_since.get_or_insert_with(Utc::now);
        self.task.status = TaskStatus::Blocked;
        self
    }

    pub fn with_subtasks(mut self, completed: i32, total: i32) -> Self {
        self.task.subtasks_completed = completed;
        self.task.subtasks_total = total;
        self.task.percent_complete = cadre_core::models::rollup_percent(completed, total);
        self
    }

    pub fn with_completed_at(mut self, completed_at: DateTime<Utc>) -> Self {
        self.task.completed_at = Some(completed_at);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.task.version = version;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let task = TaskBuilder::new().build();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.version, 1);
        assert_eq!(task.depth, 0);
    }

    #[test]
    fn test_status_implies_timestamps() {
        let task = TaskBuilder::new().with_status(TaskStatus::Completed).build();
        assert!(task.completed_at.is_some());

        let task = TaskBuilder::new().with_blocked_by(["T2"]).build();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(task.blocked_since.is_some());
        assert!(task.blocked_by.contains("T2"));
    }

    #[test]
    fn test_subtask_percent_derivation() {
        let task = TaskBuilder::new().with_subtasks(1, 3).build();
        assert_eq!(task.percent_complete, 33);
    }
}
