use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Per-job execution statistics. One logical execution (retries included)
/// counts once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub consecutive_failures: u32,
    /// Running mean over settled executions, in milliseconds.
    pub average_execution_time_ms: f64,
    /// Percentage of successful executions; 100 when nothing ran yet.
    pub uptime: f64,
    pub last_execution_time: Option<DateTime<Utc>>,
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self {
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            consecutive_failures: 0,
            average_execution_time_ms: 0.0,
            uptime: 100.0,
            last_execution_time: None,
        }
    }
}

impl JobMetrics {
    fn settle(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.total_executions += 1;
        let duration_ms = duration.as_secs_f64() * 1000.0;
        self.average_execution_time_ms +=
            (duration_ms - self.average_execution_time_ms) / self.total_executions as f64;
        self.last_execution_time = Some(at);
    }

    fn record_success(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.settle(duration, at);
        self.successful_executions += 1;
        self.consecutive_failures = 0;
        self.refresh_uptime();
    }

    fn record_failure(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.settle(duration, at);
        self.failed_executions += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.refresh_uptime();
    }

    fn refresh_uptime(&mut self) {
        self.uptime = compute_uptime(self.successful_executions, self.total_executions);
    }
}

pub fn compute_uptime(successful: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (successful as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Accumulates per-job metrics in memory.
///
/// Only the executor's settle path and the recovery manager's reset mutate
/// entries. Entries are never removed.
#[derive(Default)]
pub struct MetricsCollector {
    metrics: Mutex<HashMap<String, JobMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobMetrics>> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make sure a job has an entry, so it shows up with default metrics.
    pub fn ensure(&self, job_name: &str) {
        self.lock().entry(job_name.to_string()).or_default();
    }

    pub fn record_success(&self, job_name: &str, duration: Duration, at: DateTime<Utc>) -> JobMetrics {
        let mut metrics = self.lock();
        let entry = metrics.entry(job_name.to_string()).or_default();
        entry.record_success(duration, at);
        entry.clone()
    }

    pub fn record_failure(&self, job_name: &str, duration: Duration, at: DateTime<Utc>) -> JobMetrics {
        let mut metrics = self.lock();
        let entry = metrics.entry(job_name.to_string()).or_default();
        entry.record_failure(duration, at);
        entry.clone()
    }

    /// Give a job a clean failure streak. Returns the metrics as they were
    /// before the reset, or `None` for unknown jobs.
    pub fn reset_consecutive_failures(&self, job_name: &str) -> Option<JobMetrics> {
        let mut metrics = self.lock();
        let entry = metrics.get_mut(job_name)?;
        let previous = entry.clone();
        entry.consecutive_failures = 0;
        Some(previous)
    }

    /// Put back a streak cleared by `reset_consecutive_failures`. Failures
    /// settled in between are kept on top of it.
    pub fn restore_consecutive_failures(&self, job_name: &str, streak: u32) {
        if let Some(entry) = self.lock().get_mut(job_name) {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(streak);
        }
    }

    pub fn get(&self, job_name: &str) -> Option<JobMetrics> {
        self.lock().get(job_name).cloned()
    }

    /// Names of jobs whose failure streak reached `threshold`, sorted.
    pub fn failing_jobs(&self, threshold: u32) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, m)| m.consecutive_failures >= threshold)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn count_failing(&self, threshold: u32) -> usize {
        self.lock()
            .values()
            .filter(|m| m.consecutive_failures >= threshold)
            .count()
    }

    /// Copy of every entry, sorted by job name.
    pub fn snapshot_all(&self) -> Vec<(String, JobMetrics)> {
        let mut all: Vec<(String, JobMetrics)> = self
            .lock()
            .iter()
            .map(|(name, m)| (name.clone(), m.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Replace a job's metrics with a persisted snapshot.
    pub fn hydrate(&self, job_name: &str, mut snapshot: JobMetrics) {
        snapshot.refresh_uptime();
        self.lock().insert(job_name.to_string(), snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_without_executions_is_100() {
        let collector = MetricsCollector::new();
        collector.ensure("job");
        let metrics = collector.get("job").unwrap();
        assert_eq!(metrics.total_executions, 0);
        assert_eq!(metrics.uptime, 100.0);
        assert_eq!(compute_uptime(0, 0), 100.0);
    }

    #[test]
    fn test_running_average() {
        let collector = MetricsCollector::new();
        let now = Utc::now();
        collector.record_success("job", Duration::from_millis(100), now);
        collector.record_failure("job", Duration::from_millis(300), now);
        let metrics = collector.record_success("job", Duration::from_millis(200), now);

        assert_eq!(metrics.total_executions, 3);
        assert!((metrics.average_execution_time_ms - 200.0).abs() < 1e-6);
        assert!((metrics.uptime - 200.0 / 3.0).abs() < 1e-6);
        assert_eq!(metrics.last_execution_time, Some(now));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let collector = MetricsCollector::new();
        let now = Utc::now();
        for _ in 0..7 {
            collector.record_failure("job", Duration::from_millis(1), now);
        }
        assert_eq!(collector.get("job").unwrap().consecutive_failures, 7);

        let metrics = collector.record_success("job", Duration::from_millis(1), now);
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.failed_executions, 7);
        assert_eq!(metrics.successful_executions, 1);
    }

    #[test]
    fn test_failing_jobs_threshold() {
        let collector = MetricsCollector::new();
        let now = Utc::now();
        for _ in 0..3 {
            collector.record_failure("b", Duration::from_millis(1), now);
            collector.record_failure("a", Duration::from_millis(1), now);
        }
        collector.record_failure("c", Duration::from_millis(1), now);

        assert_eq!(collector.failing_jobs(3), vec!["a", "b"]);
        assert_eq!(collector.count_failing(1), 3);

        let previous = collector.reset_consecutive_failures("a").unwrap();
        assert_eq!(previous.consecutive_failures, 3);
        assert_eq!(collector.failing_jobs(3), vec!["b"]);
        assert!(collector.reset_consecutive_failures("unknown").is_none());
    }

    #[test]
    fn test_restore_consecutive_failures() {
        let collector = MetricsCollector::new();
        let now = Utc::now();
        for _ in 0..3 {
            collector.record_failure("a", Duration::from_millis(1), now);
        }

        let previous = collector.reset_consecutive_failures("a").unwrap();
        collector.record_failure("a", Duration::from_millis(1), now);
        collector.restore_consecutive_failures("a", previous.consecutive_failures);

        let metrics = collector.get("a").unwrap();
        assert_eq!(metrics.consecutive_failures, 4);
        assert_eq!(metrics.total_executions, 4);

        collector.restore_consecutive_failures("unknown", 2);
        assert!(collector.get("unknown").is_none());
    }

    #[test]
    fn test_hydrate_recomputes_uptime() {
        let collector = MetricsCollector::new();
        collector.hydrate(
            "job",
            JobMetrics {
                total_executions: 4,
                successful_executions: 3,
                failed_executions: 1,
                uptime: 0.0,
                ..Default::default()
            },
        );
        assert_eq!(collector.get("job").unwrap().uptime, 75.0);
    }
}
