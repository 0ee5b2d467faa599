//! Cadre Core Library
//!
//! This crate provides the foundational domain models, error types and trait
//! interfaces for the cadre task lifecycle engine. All other crates depend
//! on the types and interfaces defined here; nothing in this crate performs
//! I/O.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`models`] - Core domain models (Task, TaskStatus, Message, etc.)
//! - [`error`] - Error types and result handling
//! - [`repository`] - Store traits for tasks, messages and the org hierarchy
//! - [`paths`] - Pure workspace path resolution, including sharding
//! - [`cycle`] - Normalized wait-for cycles for deadlock deduplication

pub mod cycle;
pub mod error;
pub mod models;
pub mod paths;
pub mod repository;

// Re-export commonly used types at the crate root for convenience
pub use cycle::NormalizedCycle;
pub use error::{FsErrorKind, Result, TaskError};
pub use models::{
    AgentProfile, CommunicationPreferences, Message, MessagePriority, NewMessage, NewTask,
    Priority, Task, TaskStatus, TransitionExtras,
};
pub use paths::{ArchiveMonth, PathResolver};
pub use repository::{MessageStore, OrgDirectory, TaskStore};

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
