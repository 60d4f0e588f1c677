//! Automation scheduling engine.
//!
//! Owns a registry of recurring jobs, runs them under a global concurrency
//! ceiling, tracks per-job metrics, evaluates system health on a fixed
//! interval and reacts to critical health with automatic recovery.

mod config;
mod context;
mod engine;
mod error;
mod events;
mod executor;
mod health;
mod job;
pub mod jobs;
mod limiter;
mod metrics;
mod planner;
mod recovery;
mod registry;

pub use config::SchedulerConfig;
pub use context::JobContext;
pub use engine::{AutomationEngine, SchedulerStatus};
pub use error::SchedulerError;
pub use events::{EventBus, SchedulerEvent};
pub use executor::{ExecutionReport, JobExecutor, TriggerSource};
pub use health::{
    evaluate_health, HealthIssue, HealthMonitor, HealthStatus, ResourceSample, ResourceSampler,
    SysinfoSampler, SystemHealth,
};
pub use job::{job_fn, JobDefinition, JobHandler, JobPriority, JobSchedule};
pub use limiter::{ConcurrencyLimiter, ExecutionPermit};
pub use metrics::{compute_uptime, JobMetrics, MetricsCollector};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use registry::{EnabledJobs, JobRegistry, JobSummary};
