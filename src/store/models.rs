use crate::automation::{HealthStatus, TriggerSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    /// A failure caused by the job timeout.
    TimedOut,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "timed_out" => Some(ExecutionStatus::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::TimedOut)
    }
}

/// One logical execution as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct JobExecution {
    pub execution_id: String,
    pub job_name: String,
    pub trigger: TriggerSource,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// A persisted health tick.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub id: i64,
    pub status: HealthStatus,
    pub active_jobs: usize,
    pub failed_jobs: usize,
    pub system_load: f64,
    pub memory_usage: f64,
    /// Issue codes, in evaluation order.
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}
