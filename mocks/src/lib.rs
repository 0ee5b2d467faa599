//! Mock implementations and test utilities for the cadre lifecycle engine
//!
//! This crate provides testing infrastructure shared by the other crates:
//! - In-memory mocks of the store traits with error injection
//! - Fluent builders for test data construction
//! - Property-based testing strategies

pub mod builders;
pub mod generators;
pub mod repository;

pub use builders::TaskBuilder;
pub use generators::{arb_agent_id, arb_priority, arb_status, extras_for};
pub use repository::{MockMessageStore, MockTaskStore};
