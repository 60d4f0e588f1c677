use super::limiter::ConcurrencyLimiter;
use super::metrics::MetricsCollector;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use sysinfo::System;

pub const CRITICAL_MEMORY_USAGE: f64 = 90.0;
pub const HIGH_MEMORY_USAGE: f64 = 80.0;
pub const HIGH_SYSTEM_LOAD: f64 = 80.0;
pub const CRITICAL_FAILED_JOBS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(HealthStatus::Healthy),
            "degraded" => Some(HealthStatus::Degraded),
            "critical" => Some(HealthStatus::Critical),
            _ => None,
        }
    }
}

/// A condition that contributed to a health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssue {
    CriticalMemoryUsage,
    TooManyFailedJobs,
    ResourceSamplingFailed,
    HighSystemLoad,
    HighMemoryUsage,
    FailedJobs,
}

impl HealthIssue {
    pub fn code(&self) -> &'static str {
        match self {
            HealthIssue::CriticalMemoryUsage => "critical_memory_usage",
            HealthIssue::TooManyFailedJobs => "too_many_failed_jobs",
            HealthIssue::ResourceSamplingFailed => "resource_sampling_failed",
            HealthIssue::HighSystemLoad => "high_system_load",
            HealthIssue::HighMemoryUsage => "high_memory_usage",
            HealthIssue::FailedJobs => "failed_jobs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical_memory_usage" => Some(HealthIssue::CriticalMemoryUsage),
            "too_many_failed_jobs" => Some(HealthIssue::TooManyFailedJobs),
            "resource_sampling_failed" => Some(HealthIssue::ResourceSamplingFailed),
            "high_system_load" => Some(HealthIssue::HighSystemLoad),
            "high_memory_usage" => Some(HealthIssue::HighMemoryUsage),
            "failed_jobs" => Some(HealthIssue::FailedJobs),
            _ => None,
        }
    }
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Result of one health tick. Recomputed wholesale every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub active_jobs: usize,
    /// Jobs whose failure streak is at or above the failure threshold.
    pub failed_jobs: usize,
    pub system_load: f64,
    pub memory_usage: f64,
    pub last_health_check: DateTime<Utc>,
    pub issues: Vec<HealthIssue>,
}

impl SystemHealth {
    pub fn has_issue(&self, issue: HealthIssue) -> bool {
        self.issues.contains(&issue)
    }

    pub fn issue_codes(&self) -> Vec<&'static str> {
        self.issues.iter().map(HealthIssue::code).collect()
    }
}

/// Host resource indicators, both as percentages in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub system_load: f64,
    pub memory_usage: f64,
}

/// Source of host resource indicators.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<ResourceSample>;
}

/// Samples global CPU usage and memory usage through `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceSample> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total_memory = system.total_memory();
        if total_memory == 0 {
            bail!("Host reported zero total memory");
        }
        let memory_usage = system.used_memory() as f64 / total_memory as f64 * 100.0;
        let system_load = system.global_cpu_usage() as f64;

        Ok(ResourceSample {
            system_load: system_load.clamp(0.0, 100.0),
            memory_usage: memory_usage.clamp(0.0, 100.0),
        })
    }
}

/// Derive a health verdict from raw indicators.
///
/// The most severe matching rule sets the status; `issues` lists every rule
/// that matched. A failed resource sample is itself a critical signal.
pub fn evaluate_health(
    sample: Result<ResourceSample>,
    active_jobs: usize,
    failed_jobs: usize,
    now: DateTime<Utc>,
) -> SystemHealth {
    let mut issues = Vec::new();

    let (system_load, memory_usage) = match sample {
        Ok(sample) => (sample.system_load, sample.memory_usage),
        Err(_) => {
            issues.push(HealthIssue::ResourceSamplingFailed);
            (0.0, 0.0)
        }
    };

    if memory_usage >= CRITICAL_MEMORY_USAGE {
        issues.push(HealthIssue::CriticalMemoryUsage);
    }
    if failed_jobs >= CRITICAL_FAILED_JOBS {
        issues.push(HealthIssue::TooManyFailedJobs);
    }
    let critical = !issues.is_empty();

    if system_load >= HIGH_SYSTEM_LOAD {
        issues.push(HealthIssue::HighSystemLoad);
    }
    if memory_usage >= HIGH_MEMORY_USAGE {
        issues.push(HealthIssue::HighMemoryUsage);
    }
    if failed_jobs >= 1 {
        issues.push(HealthIssue::FailedJobs);
    }

    let status = if critical {
        HealthStatus::Critical
    } else if !issues.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    SystemHealth {
        status,
        active_jobs,
        failed_jobs,
        system_load,
        memory_usage,
        last_health_check: now,
        issues,
    }
}

/// Computes fresh `SystemHealth` values from the sampler and engine state.
pub struct HealthMonitor {
    sampler: Arc<dyn ResourceSampler>,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<ConcurrencyLimiter>,
    failure_threshold: u32,
}

impl HealthMonitor {
    pub fn new(
        sampler: Arc<dyn ResourceSampler>,
        metrics: Arc<MetricsCollector>,
        limiter: Arc<ConcurrencyLimiter>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            sampler,
            metrics,
            limiter,
            failure_threshold,
        }
    }

    pub fn check(&self) -> SystemHealth {
        let sample = self.sampler.sample();
        if let Err(e) = &sample {
            tracing::error!("Failed to sample host resources: {:#}", e);
        }
        evaluate_health(
            sample,
            self.limiter.running(),
            self.metrics.count_failing(self.failure_threshold),
            Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn sample(system_load: f64, memory_usage: f64) -> Result<ResourceSample> {
        Ok(ResourceSample {
            system_load,
            memory_usage,
        })
    }

    #[test]
    fn test_healthy() {
        let health = evaluate_health(sample(10.0, 40.0), 2, 0, Utc::now());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.issues.is_empty());
        assert_eq!(health.active_jobs, 2);
    }

    #[test]
    fn test_memory_at_90_is_always_critical() {
        for (load, failed) in [(0.0, 0), (50.0, 0), (99.0, 5), (0.0, 1)] {
            let health = evaluate_health(sample(load, 90.0), 0, failed, Utc::now());
            assert_eq!(health.status, HealthStatus::Critical);
            assert!(health.has_issue(HealthIssue::CriticalMemoryUsage));
        }
    }

    #[test]
    fn test_three_failed_jobs_is_critical() {
        let health = evaluate_health(sample(0.0, 0.0), 0, 3, Utc::now());
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(
            health.issues,
            vec![HealthIssue::TooManyFailedJobs, HealthIssue::FailedJobs]
        );
    }

    #[test]
    fn test_degraded_rules() {
        let load = evaluate_health(sample(80.0, 10.0), 0, 0, Utc::now());
        assert_eq!(load.status, HealthStatus::Degraded);
        assert_eq!(load.issues, vec![HealthIssue::HighSystemLoad]);

        let memory = evaluate_health(sample(0.0, 85.0), 0, 0, Utc::now());
        assert_eq!(memory.status, HealthStatus::Degraded);
        assert_eq!(memory.issues, vec![HealthIssue::HighMemoryUsage]);

        let failed = evaluate_health(sample(0.0, 0.0), 0, 1, Utc::now());
        assert_eq!(failed.status, HealthStatus::Degraded);
        assert_eq!(failed.issues, vec![HealthIssue::FailedJobs]);
    }

    #[test]
    fn test_issues_list_every_matched_rule() {
        let health = evaluate_health(sample(95.0, 92.0), 1, 4, Utc::now());
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(
            health.issue_codes(),
            vec![
                "critical_memory_usage",
                "too_many_failed_jobs",
                "high_system_load",
                "high_memory_usage",
                "failed_jobs",
            ]
        );
    }

    #[test]
    fn test_sampling_failure_is_critical() {
        let health = evaluate_health(Err(anyhow!("no /proc")), 0, 0, Utc::now());
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(health.issues, vec![HealthIssue::ResourceSamplingFailed]);
    }

    #[test]
    fn test_health_serialization() {
        let health = evaluate_health(sample(85.0, 10.0), 0, 0, Utc::now());
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["issues"][0], "high_system_load");
    }

    #[test]
    fn test_sysinfo_sampler_ranges() {
        let sampler = SysinfoSampler::new();
        if let Ok(sample) = sampler.sample() {
            assert!((0.0..=100.0).contains(&sample.system_load));
            assert!((0.0..=100.0).contains(&sample.memory_usage));
        }
    }
}
