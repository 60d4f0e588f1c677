use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the automation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Maximum concurrent jobs limit reached ({limit})")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Job {job_name} timed out after {timeout:?}")]
    Timeout { job_name: String, timeout: Duration },

    #[error("Job {job_name} failed: {message}")]
    ExecutionFailed { job_name: String, message: String },

    #[error("Invalid schedule for job {job_name}: {reason}")]
    InvalidSchedule { job_name: String, reason: String },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

impl SchedulerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::Timeout { .. })
    }

    /// Short label used for metrics and API error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::JobNotFound(_) => "job_not_found",
            SchedulerError::DuplicateJob(_) => "duplicate_job",
            SchedulerError::ConcurrencyLimitExceeded { .. } => "concurrency_limit_exceeded",
            SchedulerError::Timeout { .. } => "timeout",
            SchedulerError::ExecutionFailed { .. } => "execution_failed",
            SchedulerError::InvalidSchedule { .. } => "invalid_schedule",
            SchedulerError::ShuttingDown => "shutting_down",
            SchedulerError::AlreadyRunning => "already_running",
        }
    }
}
