//! Shared wiring for engine integration tests: an in-memory store over a
//! tempdir workspace, assembled the way a deployment would.

// Each integration test binary compiles this module separately and uses a
// different slice of the harness.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cadre_core::{paths::PathResolver, repository::TaskStore};
use cadre_database::{SqliteMessageStore, SqliteTaskStore};
use cadre_engine::{
    agents::AgentDirectory, archive::ArchivalEngine, coordinator::LifecycleCoordinator,
    deadlock::DeadlockDetector, messaging::MessageBus, workspace::WorkspaceMaterializer,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub root: TempDir,
    pub store: Arc<SqliteTaskStore>,
    pub messages: Arc<SqliteMessageStore>,
    pub resolver: PathResolver,
    pub coordinator: LifecycleCoordinator,
    pub archival: ArchivalEngine,
    pub detector: DeadlockDetector,
    pub ct: CancellationToken,
}

pub async fn harness() -> Harness {
    let root = tempfile::tempdir().unwrap();
    let resolver = PathResolver::new(root.path());

    let store = Arc::new(SqliteTaskStore::open(":memory:").await.unwrap());
    let messages = Arc::new(SqliteMessageStore::new(store.pool().clone()));
    let agents = Arc::new(AgentDirectory::new(resolver.clone(), Duration::from_secs(30)));

    let coordinator = LifecycleCoordinator::new(
        store.clone() as Arc<dyn TaskStore>,
        WorkspaceMaterializer::new(resolver.clone()),
        MessageBus::new(resolver.clone(), messages.clone()),
        agents.clone(),
        8,
    );
    let archival = ArchivalEngine::new(store.clone() as Arc<dyn TaskStore>, resolver.clone());
    let detector = DeadlockDetector::new(
        store.clone() as Arc<dyn TaskStore>,
        MessageBus::new(resolver.clone(), messages.clone()),
        agents,
    );

    Harness {
        root,
        store,
        messages,
        resolver,
        coordinator,
        archival,
        detector,
        ct: CancellationToken::new(),
    }
}

impl Harness {
    /// Drop an agent profile into the workspace.
    pub async fn write_profile(&self, agent_id: &str, display_name: &str) {
        let json = format!(r#"{{"id": "{agent_id}", "display_name": "{display_name}"}}"#);
        cadre_engine::fsio::write_atomic(&self.resolver.agent_profile(agent_id), json.as_bytes())
            .await
            .unwrap();
    }

    /// Rewind a task's completion timestamp, simulating age.
    pub async fn rewind_completed_at(&self, task_id: &str, to: chrono::DateTime<chrono::Utc>) {
        sqlx::query("UPDATE tasks SET completed_at = ? WHERE id = ?")
            .bind(to)
            .bind(task_id)
            .execute(self.store.pool())
            .await
            .unwrap();
    }

    /// The canonical directory for a task row as currently stored.
    pub async fn task_dir(&self, task_id: &str) -> std::path::PathBuf {
        let task = self.store.get(task_id).await.unwrap().unwrap();
        self.resolver.task_dir(&task).unwrap()
    }

    /// Assert the task's directory exists in exactly one status location
    /// and that it matches the stored status.
    pub async fn assert_dir_mirrors_status(&self, task_id: &str) {
        let task = self.store.get(task_id).await.unwrap().unwrap();
        let canonical = self.resolver.task_dir(&task).unwrap();
        assert!(
            tokio::fs::metadata(&canonical).await.is_ok(),
            "canonical dir missing for {task_id} in status {}",
            task.status
        );

        for candidate in self.resolver.task_dir_candidates(&task.agent_id, &task.id) {
            if candidate != canonical {
                assert!(
                    tokio::fs::metadata(&candidate).await.is_err(),
                    "stray directory {candidate:?} for {task_id}"
                );
            }
        }
    }
}
