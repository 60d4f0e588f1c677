use serde::{Serialize, Serializer};
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 10;
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_METRICS_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_THROTTLE_STEP: usize = 2;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine-level configuration, fixed at construction.
///
/// `max_concurrent_jobs` is only the starting ceiling: the live value is
/// owned by the concurrency limiter and may be lowered by recovery.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    #[serde(serialize_with = "as_secs")]
    pub health_check_interval: Duration,
    /// Consecutive failures at which a job counts as failed.
    pub failure_threshold: u32,
    /// Minimum interval between two automatic restarts of the same job.
    #[serde(serialize_with = "as_secs")]
    pub recovery_delay: Duration,
    pub enable_metrics: bool,
    pub enable_auto_recovery: bool,
    #[serde(serialize_with = "as_secs")]
    pub metrics_snapshot_interval: Duration,
    /// How long `stop()` waits for in-flight executions before aborting them.
    #[serde(serialize_with = "as_secs")]
    pub shutdown_grace: Duration,
    /// Amount the concurrency ceiling drops on each throttle.
    pub throttle_step: usize,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            enable_metrics: true,
            enable_auto_recovery: true,
            metrics_snapshot_interval: DEFAULT_METRICS_SNAPSHOT_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            throttle_step: DEFAULT_THROTTLE_STEP,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_concurrent_jobs >= 1,
            "max_concurrent_jobs must be at least 1"
        );
        anyhow::ensure!(
            self.failure_threshold >= 1,
            "failure_threshold must be at least 1"
        );
        anyhow::ensure!(
            !self.health_check_interval.is_zero(),
            "health_check_interval must be greater than zero"
        );
        anyhow::ensure!(
            !self.metrics_snapshot_interval.is_zero(),
            "metrics_snapshot_interval must be greater than zero"
        );
        anyhow::ensure!(self.throttle_step >= 1, "throttle_step must be at least 1");
        Ok(())
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
