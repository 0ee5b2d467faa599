//! Deadlock detection over the wait-for graph.
//!
//! Nodes are tasks, edges are "t waits on u" for each entry of
//! `blocked_by`. Cycles are found per blocked task with an iterative DFS,
//! reduced to [`NormalizedCycle`] values for deduplication, and reported
//! with exactly one urgent notification per participating agent, all
//! sharing the cycle's deterministic thread id.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use cadre_core::{
    cycle::NormalizedCycle,
    error::Result,
    models::{MessagePriority, Task},
    repository::TaskStore,
};
use tokio_util::sync::CancellationToken;

use crate::{
    agents::AgentDirectory,
    messaging::{render_deadlock_notification, MessageBus, Notification},
};

/// Agent id stamped as the sender of deadlock notifications.
const MONITOR_AGENT: &str = "lifecycle-monitor";

/// Result of one deadlock sweep.
#[derive(Debug, Clone, Default)]
pub struct DeadlockReport {
    pub deadlocks_detected: usize,
    pub notifications_sent: usize,
    pub deadlocked_task_ids: BTreeSet<String>,
    pub cycles: Vec<NormalizedCycle>,
}

/// Finds wait-for cycles and dispatches deadlock notifications.
pub struct DeadlockDetector {
    store: Arc<dyn TaskStore>,
    bus: MessageBus,
    agents: Arc<AgentDirectory>,
}

impl DeadlockDetector {
    pub fn new(store: Arc<dyn TaskStore>, bus: MessageBus, agents: Arc<AgentDirectory>) -> Self {
        Self { store, bus, agents }
    }

    /// Detect a cycle reachable from one task against the live store.
    pub async fn detect_from(&self, start: &str) -> Result<Option<NormalizedCycle>> {
        let blocked = self.store.list_blocked().await?;
        let edges = wait_for_edges(&blocked);
        Ok(find_cycle_from(start, &edges).map(NormalizedCycle::new))
    }

    /// Sweep every blocked task, deduplicate the cycles found, and send
    /// one urgent, action-required notification per participating agent
    /// and cycle. Notification failures are logged and do not abort the
    /// sweep.
    pub async fn sweep(&self, ct: &CancellationToken) -> Result<DeadlockReport> {
        let blocked = self.store.list_blocked().await?;
        let edges = wait_for_edges(&blocked);
        let tasks_by_id: HashMap<&str, &Task> =
            blocked.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut cycles: BTreeSet<NormalizedCycle> = BTreeSet::new();
        for task in &blocked {
            if ct.is_cancelled() {
                return Err(cadre_core::TaskError::interrupted(
                    "cancelled during deadlock sweep",
                ));
            }
            if let Some(raw) = find_cycle_from(&task.id, &edges) {
                cycles.insert(NormalizedCycle::new(raw));
            }
        }

        let mut report = DeadlockReport {
            deadlocks_detected: cycles.len(),
            ..Default::default()
        };

        for cycle in &cycles {
            report
                .deadlocked_task_ids
                .extend(cycle.tasks().iter().cloned());

            // One message per agent even when several of their tasks sit
            // in the same cycle.
            let mut agent_tasks: BTreeMap<&str, Vec<&Task>> = BTreeMap::new();
            for task_id in cycle.tasks() {
                if let Some(task) = tasks_by_id.get(task_id.as_str()).copied() {
                    agent_tasks.entry(task.agent_id.as_str()).or_default().push(task);
                }
            }

            let thread_id = cycle.thread_id();
            for (agent_id, tasks) in agent_tasks {
                let prefs = self.agents.preferences(agent_id).await;
                if !prefs.notify_on_deadlock {
                    continue;
                }
                let display = self.agents.display_name(agent_id).await;
                let notification = Notification {
                    from_agent: MONITOR_AGENT.to_string(),
                    to_agent: agent_id.to_string(),
                    priority: MessagePriority::Urgent,
                    action_required: true,
                    subject: format!("Deadlock detected: {}", cycle.describe()),
                    thread_id: thread_id.clone(),
                    body: render_deadlock_notification(&display, cycle, &tasks),
                };
                match self.bus.send(notification).await {
                    Ok(_) => report.notifications_sent += 1,
                    Err(err) => {
                        tracing::warn!(agent_id, error = %err, "deadlock notification failed")
                    }
                }
            }
        }

        report.cycles = cycles.into_iter().collect();
        if report.deadlocks_detected > 0 {
            tracing::warn!(
                deadlocks = report.deadlocks_detected,
                notified = report.notifications_sent,
                "deadlock sweep found cycles"
            );
        }
        Ok(report)
    }
}

/// Project blocked tasks into the wait-for adjacency map. Only blocked
/// tasks with a non-empty wait-for set become expandable nodes; every
/// other id mentioned in an edge is a dead end.
fn wait_for_edges(blocked: &[Task]) -> HashMap<String, Vec<String>> {
    blocked
        .iter()
        .filter(|t| !t.blocked_by.is_empty())
        .map(|t| (t.id.clone(), t.blocked_by.iter().cloned().collect()))
        .collect()
}

/// Iterative DFS from `start`; returns the first cycle found, as the
/// slice of the DFS stack from the revisited node to the top.
fn find_cycle_from(start: &str, edges: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    if !edges.contains_key(start) {
        return None;
    }

    struct Frame {
        node: String,
        next_edge: usize,
    }

    let mut stack = vec![Frame {
        node: start.to_string(),
        next_edge: 0,
    }];
    let mut on_stack: HashSet<String> = HashSet::from([start.to_string()]);
    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);

    while let Some(frame) = stack.last_mut() {
        let neighbors = &edges[&frame.node];
        if frame.next_edge < neighbors.len() {
            let next = neighbors[frame.next_edge].clone();
            frame.next_edge += 1;

            if on_stack.contains(&next) {
                let from = stack.iter().position(|f| f.node == next).unwrap_or(0);
                return Some(stack[from..].iter().map(|f| f.node.clone()).collect());
            }
            if !visited.contains(&next) && edges.contains_key(&next) {
                visited.insert(next.clone());
                on_stack.insert(next.clone());
                stack.push(Frame {
                    node: next,
                    next_edge: 0,
                });
            }
        } else {
            on_stack.remove(&frame.node);
            stack.pop();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(node, targets)| {
                (
                    node.to_string(),
                    targets.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_two_cycle_found_from_either_entry() {
        let edges = graph(&[("A", &["B"]), ("B", &["A"])]);
        let from_a = NormalizedCycle::new(find_cycle_from("A", &edges).unwrap());
        let from_b = NormalizedCycle::new(find_cycle_from("B", &edges).unwrap());
        assert_eq!(from_a, from_b);
        assert_eq!(from_a.len(), 2);
    }

    #[test]
    fn test_three_cycle_rotations_normalize_equal() {
        let edges = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        let cycles: Vec<NormalizedCycle> = ["A", "B", "C"]
            .iter()
            .map(|start| NormalizedCycle::new(find_cycle_from(start, &edges).unwrap()))
            .collect();
        assert_eq!(cycles[0], cycles[1]);
        assert_eq!(cycles[1], cycles[2]);
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn test_chain_has_no_cycle() {
        let edges = graph(&[("A", &["B"]), ("B", &["C"])]);
        assert!(find_cycle_from("A", &edges).is_none());
        assert!(find_cycle_from("C", &edges).is_none());
    }

    #[test]
    fn test_missing_targets_are_dead_ends() {
        // B waits on a task that is not blocked (or does not exist)
        let edges = graph(&[("A", &["B"]), ("B", &["ghost"])]);
        assert!(find_cycle_from("A", &edges).is_none());
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let edges = graph(&[("A", &["A"])]);
        let cycle = find_cycle_from("A", &edges).unwrap();
        assert_eq!(cycle, vec!["A".to_string()]);
    }

    #[test]
    fn test_cycle_off_the_start_branch_is_still_reported() {
        // A reaches the B↔C cycle without being part of it
        let edges = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["B"])]);
        let cycle = NormalizedCycle::new(find_cycle_from("A", &edges).unwrap());
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains("B") && cycle.contains("C"));
    }

    #[test]
    fn test_diamond_without_cycle() {
        let edges = graph(&[("A", &["B", "C"]), ("B", &["D"]), ("C", &["D"])]);
        assert!(find_cycle_from("A", &edges).is_none());
    }
}
