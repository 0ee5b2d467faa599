//! Workspace materialization.
//!
//! Mirrors task state as a per-task directory holding exactly four files:
//! `plan.md`, `progress.md`, `subtasks.md` and `context.json`. All on-disk
//! formats are emitted here and nowhere else. Status changes move the
//! directory as a whole; file contents are only rewritten when a caller
//! asks for a fresh `context.json` projection.

use std::path::PathBuf;

use cadre_core::{
    error::Result,
    models::{Task, TaskStatus},
    paths::PathResolver,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsio::{self, MoveOutcome};

/// Narrative content accompanying a task at creation.
///
/// Everything in here is authored by agents; the engine treats it as
/// opaque text and only seeds the initial documents from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskNarrative {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub approach: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Machine-readable projection of a task row, stable schema.
///
/// Readers must ignore unknown keys; the writer never emits `null` where
/// an empty collection is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextDoc {
    pub task: ContextTask,
    pub hierarchy: ContextHierarchy,
    pub delegation: ContextDelegation,
    pub progress: ContextProgress,
    pub context: ContextNarrative,
    pub execution: ContextExecution,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextTask {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: cadre_core::models::Priority,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextHierarchy {
    pub parent_task_id: Option<String>,
    pub depth: i32,
    pub task_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextDelegation {
    pub delegated_to: Option<String>,
    pub delegated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextProgress {
    pub percent_complete: i32,
    pub subtasks_completed: i32,
    pub subtasks_total: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub blocked_by: Vec<String>,
    pub blocked_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextNarrative {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextExecution {
    pub version: i64,
    pub last_updated: DateTime<Utc>,
    pub last_executed: Option<DateTime<Utc>>,
    pub execution_count: i32,
}

/// Renders and relocates per-task workspace directories.
#[derive(Debug, Clone)]
pub struct WorkspaceMaterializer {
    resolver: PathResolver,
}

impl WorkspaceMaterializer {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Render the four workspace files for a task into its canonical
    /// directory, atomically per file.
    pub async fn materialize(&self, task: &Task, narrative: &TaskNarrative) -> Result<()> {
        let dir = self.resolver.task_dir(task)?;

        fsio::write_atomic(&dir.join("plan.md"), render_plan(task, narrative).as_bytes()).await?;
        fsio::write_atomic(
            &dir.join("progress.md"),
            render_progress(task).as_bytes(),
        )
        .await?;
        fsio::write_atomic(
            &dir.join("subtasks.md"),
            render_subtasks(&narrative.subtasks).as_bytes(),
        )
        .await?;
        self.write_context_into(&dir, task, Some(narrative)).await?;

        tracing::debug!(task_id = %task.id, dir = %dir.display(), "workspace materialized");
        Ok(())
    }

    /// Re-emit `context.json` from the current row. Idempotent; narrative
    /// content already on disk is preserved when no fresh narrative is
    /// supplied.
    pub async fn write_context(&self, task: &Task) -> Result<()> {
        let dir = self.resolver.task_dir(task)?;
        self.write_context_into(&dir, task, None).await
    }

    async fn write_context_into(
        &self,
        dir: &std::path::Path,
        task: &Task,
        narrative: Option<&TaskNarrative>,
    ) -> Result<()> {
        let context = match narrative {
            Some(narrative) => ContextNarrative {
                description: narrative.description.clone().unwrap_or_default(),
                goals: narrative.goals.clone(),
                notes: narrative.notes.clone().unwrap_or_default(),
            },
            None => read_existing_narrative(&dir.join("context.json")).await,
        };

        let doc = project_context(task, context);
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| {
            cadre_core::error::TaskError::InvariantViolated(format!(
                "context projection failed to serialize: {e}"
            ))
        })?;
        fsio::write_atomic(&dir.join("context.json"), &bytes).await
    }

    /// Move a task's directory from its previous status folder to the
    /// current canonical location, searching sibling status folders when
    /// the source has drifted.
    pub async fn relocate(&self, task: &Task, previous: TaskStatus) -> Result<MoveOutcome> {
        let src = self
            .resolver
            .task_dir_for_status(&task.agent_id, &task.id, previous);
        let dst = self.resolver.task_dir(task)?;
        let candidates: Vec<PathBuf> = self.resolver.task_dir_candidates(&task.agent_id, &task.id);

        let outcome = fsio::move_dir_or_search(&src, &dst, &candidates).await?;
        if outcome != MoveOutcome::Moved {
            tracing::warn!(
                task_id = %task.id,
                ?outcome,
                "workspace relocation needed the search fallback"
            );
        }
        Ok(outcome)
    }
}

/// Build the `context.json` document for a task row.
pub fn project_context(task: &Task, context: ContextNarrative) -> ContextDoc {
    ContextDoc {
        task: ContextTask {
            id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            title: task.title.clone(),
            status: task.status,
            priority: task.priority,
            created_at: task.created_at,
        },
        hierarchy: ContextHierarchy {
            parent_task_id: task.parent_task_id.clone(),
            depth: task.depth,
            task_path: task.task_path.clone(),
        },
        delegation: ContextDelegation {
            delegated_to: task.delegated_to.clone(),
            delegated_at: task.delegated_at,
        },
        progress: ContextProgress {
            percent_complete: task.percent_complete,
            subtasks_completed: task.subtasks_completed,
            subtasks_total: task.subtasks_total,
            started_at: task.started_at,
            completed_at: task.completed_at,
            blocked_by: task.blocked_by.iter().cloned().collect(),
            blocked_since: task.blocked_since,
        },
        context,
        execution: ContextExecution {
            version: task.version,
            last_updated: task.last_updated,
            last_executed: task.last_executed,
            execution_count: task.execution_count,
        },
    }
}

async fn read_existing_narrative(path: &std::path::Path) -> ContextNarrative {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice::<ContextDoc>(&bytes)
            .map(|doc| doc.context)
            .unwrap_or_default(),
        Err(_) => ContextNarrative::default(),
    }
}

fn render_plan(task: &Task, narrative: &TaskNarrative) -> String {
    let description = narrative
        .description
        .as_deref()
        .unwrap_or("_No description provided._");
    let approach = narrative
        .approach
        .as_deref()
        .unwrap_or("_To be determined._");
    let notes = narrative.notes.as_deref().unwrap_or("_None._");
    let goals = if narrative.goals.is_empty() {
        "- Deliver the task as described".to_string()
    } else {
        narrative
            .goals
            .iter()
            .map(|g| format!("- {g}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "# Plan: {title}\n\n\
         - id: {id}\n\
         - title: {title}\n\
         - status: {status}\n\
         - priority: {priority}\n\
         - created: {created}\n\n\
         ## Description\n\n{description}\n\n\
         ## Goals\n\n{goals}\n\n\
         ## Approach\n\n{approach}\n\n\
         ## Dependencies\n\n- None identified\n\n\
         ## Notes\n\n{notes}\n",
        title = task.title,
        id = task.id,
        status = task.status,
        priority = task.priority,
        created = task.created_at.to_rfc3339(),
    )
}

fn render_progress(task: &Task) -> String {
    format!(
        "# Progress: {title}\n\n\
         - Status: {status}\n\
         - Current Progress: {percent}%\n\n\
         ## Updates\n\n\
         - {date}: Task created\n\n\
         ## Blockers\n\n- None\n\n\
         ## Next Steps\n\n- Review the plan and start work\n",
        title = task.title,
        status = task.status,
        percent = task.percent_complete,
        date = task.created_at.format("%Y-%m-%d"),
    )
}

fn render_subtasks(subtasks: &[String]) -> String {
    let items = if subtasks.is_empty() {
        "- [ ] Break the task down into subtasks".to_string()
    } else {
        subtasks
            .iter()
            .map(|s| format!("- [ ] {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("# Subtasks\n\n{items}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_task() -> Task {
        Task {
            id: "T1".to_string(),
            agent_id: "manager-001".to_string(),
            title: "Implement user authentication".to_string(),
            priority: cadre_core::models::Priority::High,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
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
            task_path: "Implement user authentication".to_string(),
            version: 1,
            last_updated: Utc::now(),
            last_executed: None,
            execution_count: 0,
        }
    }

    #[tokio::test]
    async fn test_materialize_writes_all_four_files() {
        let tmp = tempfile::tempdir().unwrap();
        let materializer = WorkspaceMaterializer::new(PathResolver::new(tmp.path()));
        let task = sample_task();

        materializer
            .materialize(&task, &TaskNarrative::default())
            .await
            .unwrap();

        let dir = materializer.resolver().task_dir(&task).unwrap();
        for file in ["plan.md", "progress.md", "subtasks.md", "context.json"] {
            assert!(
                tokio::fs::metadata(dir.join(file)).await.is_ok(),
                "{file} missing"
            );
        }

        let plan = tokio::fs::read_to_string(dir.join("plan.md")).await.unwrap();
        assert!(plan.contains("id: T1"));
        assert!(plan.contains("priority: high"));
        assert!(plan.contains("## Goals"));
    }

    #[tokio::test]
    async fn test_context_json_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let materializer = WorkspaceMaterializer::new(PathResolver::new(tmp.path()));
        let task = sample_task();

        let narrative = TaskNarrative {
            description: Some("Add JWT auth".to_string()),
            goals: vec!["Secure login".to_string()],
            ..Default::default()
        };
        materializer.materialize(&task, &narrative).await.unwrap();

        let dir = materializer.resolver().task_dir(&task).unwrap();
        let raw = tokio::fs::read(dir.join("context.json")).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        for key in ["task", "hierarchy", "delegation", "progress", "context", "execution"] {
            assert!(value.get(key).is_some(), "{key} missing");
        }
        assert_eq!(value["task"]["id"], "T1");
        assert_eq!(value["hierarchy"]["depth"], 0);
        assert_eq!(value["progress"]["percent_complete"], 0);
        // Empty collections are arrays, never null
        assert!(value["progress"]["blocked_by"].is_array());
        assert_eq!(value["context"]["description"], "Add JWT auth");
    }

    #[tokio::test]
    async fn test_write_context_preserves_existing_narrative() {
        let tmp = tempfile::tempdir().unwrap();
        let materializer = WorkspaceMaterializer::new(PathResolver::new(tmp.path()));
        let mut task = sample_task();

        let narrative = TaskNarrative {
            description: Some("Original description".to_string()),
            ..Default::default()
        };
        materializer.materialize(&task, &narrative).await.unwrap();

        // Row moved on; the re-emitted projection reflects it but keeps
        // the narrative block
        task.percent_complete = 40;
        task.version = 3;
        materializer.write_context(&task).await.unwrap();

        let dir = materializer.resolver().task_dir(&task).unwrap();
        let raw = tokio::fs::read(dir.join("context.json")).await.unwrap();
        let doc: ContextDoc = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc.progress.percent_complete, 40);
        assert_eq!(doc.execution.version, 3);
        assert_eq!(doc.context.description, "Original description");
    }

    #[tokio::test]
    async fn test_subtasks_prefilled_from_input() {
        let rendered = render_subtasks(&["Design schema".to_string(), "Write tests".to_string()]);
        assert!(rendered.contains("- [ ] Design schema"));
        assert!(rendered.contains("- [ ] Write tests"));

        let placeholder = render_subtasks(&[]);
        assert!(placeholder.contains("- [ ] Break the task down"));
    }

    #[tokio::test]
    async fn test_relocate_moves_directory_between_statuses() {
        let tmp = tempfile::tempdir().unwrap();
        let materializer = WorkspaceMaterializer::new(PathResolver::new(tmp.path()));
        let mut task = sample_task();

        materializer
            .materialize(&task, &TaskNarrative::default())
            .await
            .unwrap();

        task.status = TaskStatus::InProgress;
        task.version = 2;
        let outcome = materializer.relocate(&task, TaskStatus::Pending).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);

        let resolver = materializer.resolver();
        assert!(tokio::fs::metadata(
            resolver.task_dir_for_status("manager-001", "T1", TaskStatus::InProgress)
        )
        .await
        .is_ok());
        assert!(tokio::fs::metadata(
            resolver.task_dir_for_status("manager-001", "T1", TaskStatus::Pending)
        )
        .await
        .is_err());
    }
}
