//! Normalized wait-for cycles.
//!
//! A deadlock is a simple cycle in the wait-for graph. The same cycle can be
//! discovered from any of its members and in either rotation, so detection
//! results are reduced to a canonical form before deduplication: rotate the
//! sequence so the lexicographically smallest id comes first, then pick the
//! smaller of the forward and reversed traversals.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A simple wait-for cycle in canonical orientation.
///
/// Equal as a value whenever two detections found the same underlying
/// cycle, regardless of entry point or traversal direction. Usable as a
/// dedup key and as the deterministic input of the notification
/// `thread_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedCycle(Vec<String>);

impl NormalizedCycle {
    /// Normalize a raw cycle as returned by the detector.
    ///
    /// `raw` lists the participating task ids in traversal order; the edge
    /// from the last entry back to the first is implied. Panics on an empty
    /// slice, which the detector never produces.
    pub fn new(raw: Vec<String>) -> Self {
        assert!(!raw.is_empty(), "a cycle has at least one node");

        let forward = rotate_to_min(raw.clone());
        let mut reversed = raw;
        reversed.reverse();
        let reversed = rotate_to_min(reversed);

        if forward <= reversed {
            Self(forward)
        } else {
            Self(reversed)
        }
    }

    /// Participating task ids in canonical order.
    pub fn tasks(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.0.iter().any(|id| id == task_id)
    }

    /// Deterministic thread id shared by every notification about this
    /// cycle: `deadlock-<first 16 hex chars of SHA-256 over the canonical
    /// sequence>`.
    pub fn thread_id(&self) -> String {
        let digest = Sha256::digest(self.0.join("\u{2192}").as_bytes());
        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("deadlock-{hex}")
    }

    /// Human-readable rendering, e.g. `A → B → C → A`.
    pub fn describe(&self) -> String {
        let mut parts: Vec<&str> = self.0.iter().map(String::as_str).collect();
        parts.push(&self.0[0]);
        parts.join(" \u{2192} ")
    }
}

impl std::fmt::Display for NormalizedCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

fn rotate_to_min(mut cycle: Vec<String>) -> Vec<String> {
    let min_idx = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle.rotate_left(min_idx);
    cycle
}
