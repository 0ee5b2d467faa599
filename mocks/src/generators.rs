//! Property-based testing strategies for the lifecycle domain

use cadre_core::models::{Priority, TaskStatus, TransitionExtras};
use proptest::prelude::*;

/// Strategy producing any of the five task statuses
pub fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Blocked),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Archived),
    ]
}

/// Strategy producing any task priority
pub fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Urgent),
        Just(Priority::High),
        Just(Priority::Medium),
        Just(Priority::Low),
    ]
}

/// Strategy producing agent-style identifiers
pub fn arb_agent_id() -> impl Strategy<Value = String> {
    "[a-z]{3,8}-[0-9]{3}"
}

/// The transition payload a target status requires
pub fn extras_for(target: TaskStatus) -> TransitionExtras {
    match target {
        TaskStatus::Blocked => TransitionExtras::blocked_on(["blocker".to_string()].into()),
        _ => TransitionExtras::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockTaskStore;
    use cadre_core::{models::NewTask, repository::TaskStore};

    proptest! {
        /// Random transition sequences never commit an illegal status and
        /// the version chain stays strictly increasing from 1.
        #[test]
        fn random_transitions_preserve_invariants(
            targets in proptest::collection::vec(arb_status(), 1..24)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = MockTaskStore::new();
                let created = store
                    .create(NewTask::new("T", "agent-001", "Property task", Priority::Medium))
                    .await
                    .unwrap();
                prop_assert_eq!(created.version, 1);

                let mut expected_version = 1i64;
                for target in targets {
                    let current = store.get("T").await.unwrap().unwrap();
                    prop_assert_eq!(current.version, expected_version);

                    let legal = current.status.can_transition_to(target);
                    match store
                        .transition("T", current.version, target, extras_for(target))
                        .await
                    {
                        Ok(next) => {
                            prop_assert!(legal, "illegal transition {} -> {} committed",
                                current.status, target);
                            prop_assert_eq!(next.version, expected_version + 1);
                            prop_assert_eq!(next.status, target);
                            if target == TaskStatus::Completed {
                                prop_assert!(next.completed_at.is_some());
                            }
                            expected_version += 1;
                        }
                        Err(err) => {
                            prop_assert!(!legal, "legal transition {} -> {} rejected: {err}",
                                current.status, target);
                        }
                    }
                }

                // Invariant: completed iff completed_at set
                let last = store.get("T").await.unwrap().unwrap();
                if matches!(last.status, TaskStatus::Completed | TaskStatus::Archived) {
                    prop_assert!(last.completed_at.is_some());
                }
                Ok(())
            })?;
        }
    }
}
