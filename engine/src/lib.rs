//! Cadre Lifecycle Engine
//!
//! Composes the durable task store with the on-disk workspace: atomic
//! lifecycle operations, inbox notifications, deadlock detection, and the
//! archival/compaction pipeline, plus the periodic monitor that drives the
//! sweeps.
//!
//! # Architecture
//!
//! - [`fsio`] - Crash-consistent file writes and directory moves
//! - [`workspace`] - Per-task directory materialization and relocation
//! - [`coordinator`] - Atomic lifecycle operations (create, start, block,
//!   unblock, delegate, complete, archive, reconcile)
//! - [`messaging`] - Notification rendering and inbox delivery
//! - [`agents`] - Read-through cache over on-disk agent profiles
//! - [`deadlock`] - Wait-for cycle detection and the deadlock sweep
//! - [`archive`] - Archival and compaction of retired tasks
//! - [`monitor`] - Periodic driver for the maintenance sweeps
//! - [`config`] / [`telemetry`] - Engine configuration and tracing setup
//!
//! All long-lived values (stores, resolvers, caches) are constructed at
//! startup and passed in explicitly; the engine holds no process-global
//! state.

pub mod agents;
pub mod archive;
pub mod config;
pub mod coordinator;
pub mod deadlock;
pub mod fsio;
pub mod messaging;
pub mod monitor;
pub mod telemetry;
pub mod workspace;

pub use agents::AgentDirectory;
pub use archive::ArchivalEngine;
pub use config::EngineConfig;
pub use coordinator::{CreateTask, LifecycleCoordinator};
pub use deadlock::{DeadlockDetector, DeadlockReport};
pub use fsio::MoveOutcome;
pub use messaging::{MessageBus, Notification};
pub use monitor::{LifecycleMonitor, MonitorReport, MonitorSettings};
pub use workspace::{TaskNarrative, WorkspaceMaterializer};

// Re-export the shared domain surface
pub use cadre_core::{
    error::{FsErrorKind, Result, TaskError},
    models::{Priority, Task, TaskStatus},
    paths::PathResolver,
};
