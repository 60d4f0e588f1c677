//! Automation scheduling engine library
//!
//! This library exposes the engine, its persistence and its admin surface for
//! the host binary and for tests.

pub mod automation;
pub mod config;
pub mod notifications;
pub mod server;
pub mod sqlite_persistence;
pub mod store;

// Re-export commonly used types for convenience
pub use automation::{AutomationEngine, JobDefinition, SchedulerConfig, SchedulerError};
pub use store::{ExecutionStore, SqliteExecutionStore};
