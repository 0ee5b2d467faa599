mod common;

use cadre_core::{
    models::{Priority, TaskStatus},
    repository::{MessageStore, TaskStore},
};
use cadre_engine::{coordinator::CreateTask, workspace::TaskNarrative};

#[tokio::test]
async fn test_full_lifecycle_to_completion() {
    let h = common::harness().await;

    let task = h
        .coordinator
        .create(
            CreateTask::new("manager-001", "Implement user authentication", Priority::High)
                .with_id("T1"),
            &h.ct,
        )
        .await
        .unwrap();
    assert_eq!(task.version, 1);
    h.assert_dir_mirrors_status("T1").await;

    let task = h.coordinator.start("T1", task.version, &h.ct).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    h.assert_dir_mirrors_status("T1").await;

    let task = h.coordinator.complete("T1", task.version, &h.ct).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.version, 3);
    assert!(task.completed_at.is_some());
    h.assert_dir_mirrors_status("T1").await;

    // The plan survives the moves with its original content
    let plan = tokio::fs::read_to_string(h.task_dir("T1").await.join("plan.md"))
        .await
        .unwrap();
    assert!(plan.contains("id: T1"));
    assert!(plan.contains("Implement user authentication"));
}

#[tokio::test]
async fn test_delegation_and_child_rollup() {
    let h = common::harness().await;
    h.write_profile("manager-002", "Manager Two").await;
    h.write_profile("dev-001", "Dev One").await;

    let parent = h
        .coordinator
        .create(
            CreateTask::new("manager-002", "Build feature", Priority::High).with_id("Tm"),
            &h.ct,
        )
        .await
        .unwrap();

    let parent = h
        .coordinator
        .delegate("Tm", parent.version, "dev-001", false, &h.ct)
        .await
        .unwrap();
    assert_eq!(parent.delegated_to.as_deref(), Some("dev-001"));
    assert_eq!(parent.agent_id, "manager-002");

    // Exactly one delegation message in the delegatee's inbox
    let inbox = h.messages.list_for("dev-001", true).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].thread_id, "task-Tm");
    assert!(inbox[0].action_required);
    let body = tokio::fs::read_to_string(&inbox[0].body_path).await.unwrap();
    assert!(body.contains("Task delegated: Build feature"));
    assert!(body.contains("From: Manager Two"));

    let child = h
        .coordinator
        .create(
            CreateTask::new("dev-001", "Write the code", Priority::Medium)
                .with_id("Ts")
                .with_parent("Tm"),
            &h.ct,
        )
        .await
        .unwrap();
    assert_eq!(child.depth, 1);
    assert_eq!(child.task_path, "Build feature > Write the code");

    let child = h.coordinator.start("Ts", child.version, &h.ct).await.unwrap();
    h.coordinator.complete("Ts", child.version, &h.ct).await.unwrap();

    let parent = h.store.get("Tm").await.unwrap().unwrap();
    assert_eq!(parent.subtasks_total, 1);
    assert_eq!(parent.subtasks_completed, 1);
    assert_eq!(parent.percent_complete, 100);

    // The owner also got a completion notice
    let manager_inbox = h.messages.list_for("manager-002", true).await.unwrap();
    assert_eq!(manager_inbox.len(), 1);
    assert!(manager_inbox[0].subject.starts_with("Task completed:"));
}

#[tokio::test]
async fn test_optimistic_conflict_between_two_callers() {
    let h = common::harness().await;

    let task = h
        .coordinator
        .create(CreateTask::new("a", "Contended", Priority::Medium).with_id("T"), &h.ct)
        .await
        .unwrap();
    assert_eq!(task.version, 1);

    // Caller A starts the task at version 1
    let after_a = h.coordinator.start("T", 1, &h.ct).await.unwrap();
    assert_eq!(after_a.version, 2);

    // Caller B also read version 1; completion must be rejected
    let err = h.coordinator.complete("T", 1, &h.ct).await.unwrap_err();
    assert!(err.is_version_mismatch());

    // B re-reads and retries successfully
    let current = h.store.get("T").await.unwrap().unwrap();
    let done = h.coordinator.complete("T", current.version, &h.ct).await.unwrap();
    assert_eq!(done.version, 3);
    assert_eq!(done.status, TaskStatus::Completed);
    h.assert_dir_mirrors_status("T").await;
}

#[tokio::test]
async fn test_block_unblock_flow() {
    let h = common::harness().await;

    let task = h
        .coordinator
        .create(CreateTask::new("a", "Waits", Priority::Medium).with_id("W"), &h.ct)
        .await
        .unwrap();
    let task = h.coordinator.start("W", task.version, &h.ct).await.unwrap();

    let task = h
        .coordinator
        .block("W", task.version, ["other-task".to_string()].into(), &h.ct)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(task.blocked_since.is_some());
    h.assert_dir_mirrors_status("W").await;

    // Cannot resume while the wait-for set is non-empty
    let err = h.coordinator.unblock("W", task.version, &h.ct).await.unwrap_err();
    assert_eq!(err.kind(), "invariant_violated");

    let task = h
        .store
        .set_blocked_by("W", task.version, Default::default())
        .await
        .unwrap();
    let task = h.coordinator.unblock("W", task.version, &h.ct).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.blocked_by.is_empty());
    h.assert_dir_mirrors_status("W").await;
}

#[tokio::test]
async fn test_completion_from_blocked_uses_search_fallback() {
    let h = common::harness().await;

    let task = h
        .coordinator
        .create(CreateTask::new("a", "Drifted", Priority::Medium).with_id("D"), &h.ct)
        .await
        .unwrap();
    let task = h
        .coordinator
        .block("D", task.version, ["x".to_string()].into(), &h.ct)
        .await
        .unwrap();

    // Simulate drift: the directory ends up under pending/ again
    let blocked_dir = h
        .resolver
        .task_dir_for_status("a", "D", TaskStatus::Blocked);
    let stray_dir = h.resolver.task_dir_for_status("a", "D", TaskStatus::Pending);
    tokio::fs::rename(&blocked_dir, &stray_dir).await.unwrap();

    let task = h.coordinator.complete("D", task.version, &h.ct).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    h.assert_dir_mirrors_status("D").await;
}

#[tokio::test]
async fn test_delegation_respects_recipient_preference() {
    let h = common::harness().await;
    let prefs_off = r#"{"id": "quiet-dev", "display_name": "Quiet Dev",
        "communication_preferences": {"notifyOnDelegation": false}}"#;
    cadre_engine::fsio::write_atomic(
        &h.resolver.agent_profile("quiet-dev"),
        prefs_off.as_bytes(),
    )
    .await
    .unwrap();

    let task = h
        .coordinator
        .create(CreateTask::new("m", "Quiet handoff", Priority::Low).with_id("Q"), &h.ct)
        .await
        .unwrap();
    h.coordinator
        .delegate("Q", task.version, "quiet-dev", false, &h.ct)
        .await
        .unwrap();
    assert_eq!(h.messages.unread_count("quiet-dev").await.unwrap(), 0);

    // force bypasses the opt-out
    let task = h.store.get("Q").await.unwrap().unwrap();
    h.coordinator
        .delegate("Q", task.version, "quiet-dev", true, &h.ct)
        .await
        .unwrap();
    assert_eq!(h.messages.unread_count("quiet-dev").await.unwrap(), 1);
}

#[tokio::test]
async fn test_delegating_to_unknown_agent_fails() {
    let h = common::harness().await;

    let task = h
        .coordinator
        .create(CreateTask::new("m", "Nowhere", Priority::Low).with_id("N"), &h.ct)
        .await
        .unwrap();
    let err = h
        .coordinator
        .delegate("N", task.version, "ghost-agent", false, &h.ct)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "agent_not_found");

    // The task is untouched
    let task = h.store.get("N").await.unwrap().unwrap();
    assert!(task.delegated_to.is_none());
    assert_eq!(task.version, 1);
}

#[tokio::test]
async fn test_reconcile_restores_missing_directory() {
    let h = common::harness().await;

    h.coordinator
        .create(
            CreateTask::new("a", "Lost workspace", Priority::Medium)
                .with_id("L")
                .with_narrative(TaskNarrative {
                    description: Some("recoverable".to_string()),
                    ..Default::default()
                }),
            &h.ct,
        )
        .await
        .unwrap();

    let dir = h.task_dir("L").await;
    tokio::fs::remove_dir_all(&dir).await.unwrap();

    h.coordinator.reconcile("L", &h.ct).await.unwrap();
    assert!(tokio::fs::metadata(dir.join("context.json")).await.is_ok());
    assert!(tokio::fs::metadata(dir.join("plan.md")).await.is_ok());
}

#[tokio::test]
async fn test_multi_level_rollup() {
    let h = common::harness().await;

    h.coordinator
        .create(CreateTask::new("a", "Root", Priority::Medium).with_id("R"), &h.ct)
        .await
        .unwrap();
    h.coordinator
        .create(
            CreateTask::new("a", "Mid", Priority::Medium).with_id("M").with_parent("R"),
            &h.ct,
        )
        .await
        .unwrap();
    let leaf = h
        .coordinator
        .create(
            CreateTask::new("a", "Leaf", Priority::Medium).with_id("F").with_parent("M"),
            &h.ct,
        )
        .await
        .unwrap();

    let leaf = h.coordinator.start("F", leaf.version, &h.ct).await.unwrap();
    h.coordinator.complete("F", leaf.version, &h.ct).await.unwrap();

    let mid = h.store.get("M").await.unwrap().unwrap();
    assert_eq!(mid.subtasks_completed, 1);
    assert_eq!(mid.percent_complete, 100);

    // The grandparent's direct child (M) is not completed, so its own
    // counters are unchanged
    let root = h.store.get("R").await.unwrap().unwrap();
    assert_eq!(root.subtasks_completed, 0);
    assert_eq!(root.subtasks_total, 1);

    // Completing the middle task rolls the root up too
    let mid = h.coordinator.start("M", mid.version, &h.ct).await.unwrap();
    h.coordinator.complete("M", mid.version, &h.ct).await.unwrap();
    let root = h.store.get("R").await.unwrap().unwrap();
    assert_eq!(root.subtasks_completed, 1);
    assert_eq!(root.percent_complete, 100);
}
