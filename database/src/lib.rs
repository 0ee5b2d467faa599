//! SQLite persistence for the cadre task lifecycle engine.
//!
//! This crate implements the store traits defined in `cadre-core` on top of
//! sqlx and SQLite. It is the single writer of truth: workspace directories
//! are derived state that can always be regenerated from these tables.

pub mod common;
pub mod messages;
pub mod org;
pub mod sqlite;

pub use messages::SqliteMessageStore;
pub use org::SqliteOrgDirectory;
pub use sqlite::{connect, migrate, SqliteTaskStore};

// Re-export the core interface so downstream callers need only one import
pub use cadre_core::{
    error::{Result, TaskError},
    models::{Message, NewMessage, NewTask, Task, TaskStatus, TransitionExtras},
    repository::{MessageStore, OrgDirectory, TaskStore},
};
