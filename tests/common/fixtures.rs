#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use automation_scheduler::automation::{
    JobMetrics, ResourceSample, ResourceSampler, SystemHealth, TriggerSource,
};
use automation_scheduler::notifications::{Notifier, SystemAlert};
use automation_scheduler::store::{ExecutionStatus, ExecutionStore, HealthSnapshot, JobExecution};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Resource sampler returning whatever the test sets.
pub struct FakeSampler {
    sample: Mutex<ResourceSample>,
    failing: AtomicBool,
}

impl FakeSampler {
    pub fn healthy() -> Self {
        Self {
            sample: Mutex::new(ResourceSample {
                system_load: 10.0,
                memory_usage: 20.0,
            }),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, system_load: f64, memory_usage: f64) {
        *self.sample.lock().unwrap() = ResourceSample {
            system_load,
            memory_usage,
        };
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ResourceSampler for FakeSampler {
    fn sample(&self) -> Result<ResourceSample> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("resource query unavailable"));
        }
        Ok(*self.sample.lock().unwrap())
    }
}

/// Notifier that keeps every alert it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<SystemAlert>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<SystemAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &SystemAlert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Notifier that never returns. Records that it was called.
#[derive(Default)]
pub struct StalledNotifier {
    called: AtomicBool,
}

impl StalledNotifier {
    pub fn was_called(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for StalledNotifier {
    async fn notify(&self, _alert: &SystemAlert) -> Result<()> {
        self.called.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Store whose every call fails.
pub struct FailingStore;

fn unavailable<T>() -> Result<T> {
    Err(anyhow!("store unavailable"))
}

impl ExecutionStore for FailingStore {
    fn record_execution_start(
        &self,
        _execution_id: &str,
        _job_name: &str,
        _trigger: TriggerSource,
        _started_at: DateTime<Utc>,
    ) -> Result<()> {
        unavailable()
    }

    fn record_execution_end(
        &self,
        _execution_id: &str,
        _status: ExecutionStatus,
        _duration: Duration,
        _completed_at: DateTime<Utc>,
        _error: Option<String>,
    ) -> Result<()> {
        unavailable()
    }

    fn get_execution_history(&self, _job_name: &str, _limit: usize) -> Result<Vec<JobExecution>> {
        unavailable()
    }

    fn get_running_executions(&self) -> Result<Vec<JobExecution>> {
        unavailable()
    }

    fn mark_stale_executions_failed(&self) -> Result<usize> {
        unavailable()
    }

    fn save_health_snapshot(&self, _health: &SystemHealth) -> Result<()> {
        unavailable()
    }

    fn get_recent_health(&self, _limit: usize) -> Result<Vec<HealthSnapshot>> {
        unavailable()
    }

    fn save_metrics_snapshot(&self, _job_name: &str, _metrics: &JobMetrics) -> Result<()> {
        unavailable()
    }

    fn load_latest_metrics(&self) -> Result<Vec<(String, JobMetrics)>> {
        unavailable()
    }
}
