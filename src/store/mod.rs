mod models;
mod schema;
mod sqlite_execution_store;

pub use models::*;
pub use schema::SCHEDULER_VERSIONED_SCHEMAS;
pub use sqlite_execution_store::SqliteExecutionStore;

use crate::automation::{JobMetrics, SystemHealth, TriggerSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Durable store for execution logs, health snapshots and metrics snapshots.
///
/// The engine never lets an error from here escape into the scheduling loop;
/// write failures are logged at the call site.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ExecutionStore: Send + Sync {
    fn record_execution_start(
        &self,
        execution_id: &str,
        job_name: &str,
        trigger: TriggerSource,
        started_at: DateTime<Utc>,
    ) -> Result<()>;
    fn record_execution_end(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        duration: Duration,
        completed_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<()>;
    fn get_execution_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>>;
    fn get_running_executions(&self) -> Result<Vec<JobExecution>>;
    /// Fail every execution still marked running. Returns how many were updated.
    fn mark_stale_executions_failed(&self) -> Result<usize>;

    // Health snapshots
    fn save_health_snapshot(&self, health: &SystemHealth) -> Result<()>;
    fn get_recent_health(&self, limit: usize) -> Result<Vec<HealthSnapshot>>;

    // Metrics snapshots
    fn save_metrics_snapshot(&self, job_name: &str, metrics: &JobMetrics) -> Result<()>;
    /// Latest snapshot for every job that has one.
    fn load_latest_metrics(&self) -> Result<Vec<(String, JobMetrics)>>;
}
