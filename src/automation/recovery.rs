use super::config::SchedulerConfig;
use super::events::{EventBus, SchedulerEvent};
use super::executor::{JobExecutor, TriggerSource};
use super::health::{HealthStatus, SystemHealth};
use super::limiter::ConcurrencyLimiter;
use super::metrics::{JobMetrics, MetricsCollector};
use crate::notifications::{AlertDispatcher, SystemAlert};
use crate::server::metrics;
use crate::store::ExecutionStore;
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};

/// What a successful recovery pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Jobs whose failure streak was reset and that were re-triggered.
    pub restarted_jobs: Vec<String>,
    /// Failing jobs left alone: still cooling down or rejected by admission.
    pub skipped_jobs: Vec<String>,
    pub previous_limit: usize,
    pub current_limit: usize,
}

impl RecoveryReport {
    pub fn throttled(&self) -> bool {
        self.current_limit < self.previous_limit
    }
}

/// Reacts to degraded and critical health verdicts.
pub struct RecoveryManager {
    failure_threshold: u32,
    recovery_delay: std::time::Duration,
    enable_auto_recovery: bool,
    throttle_step: usize,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<ConcurrencyLimiter>,
    executor: Arc<JobExecutor>,
    store: Arc<dyn ExecutionStore>,
    events: EventBus,
    alerts: AlertDispatcher,

    /// Last automatic restart per job, for the cooldown.
    last_restart: Mutex<HashMap<String, Instant>>,
}

impl RecoveryManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &SchedulerConfig,
        metrics: Arc<MetricsCollector>,
        limiter: Arc<ConcurrencyLimiter>,
        executor: Arc<JobExecutor>,
        store: Arc<dyn ExecutionStore>,
        events: EventBus,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_delay: config.recovery_delay,
            enable_auto_recovery: config.enable_auto_recovery,
            throttle_step: config.throttle_step,
            metrics,
            limiter,
            executor,
            store,
            events,
            alerts,
            last_restart: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one health verdict. Never fails; recovery errors are logged and
    /// published as `recovery:failed`.
    pub async fn handle(&self, health: &SystemHealth) -> Option<RecoveryReport> {
        match health.status {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded => {
                warn!(
                    "Scheduler health degraded: {}",
                    health.issue_codes().join(", ")
                );
                None
            }
            HealthStatus::Critical => {
                error!(
                    "Scheduler health critical: {}",
                    health.issue_codes().join(", ")
                );
                self.events
                    .publish(SchedulerEvent::HealthCritical(health.clone()));
                self.alerts
                    .dispatch(SystemAlert::system_critical(&health.issues))
                    .await;

                if !self.enable_auto_recovery {
                    return None;
                }

                match self.attempt_recovery() {
                    Ok(report) => {
                        info!(
                            "Recovery completed: restarted {:?}, skipped {:?}, limit {} -> {}",
                            report.restarted_jobs,
                            report.skipped_jobs,
                            report.previous_limit,
                            report.current_limit
                        );
                        self.events
                            .publish(SchedulerEvent::RecoverySucceeded(report.clone()));
                        Some(report)
                    }
                    Err(e) => {
                        error!("Recovery failed: {:#}", e);
                        metrics::record_recovery_action("failed");
                        self.events.publish(SchedulerEvent::RecoveryFailed {
                            error: format!("{:#}", e),
                        });
                        None
                    }
                }
            }
        }
    }

    fn attempt_recovery(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut handled: HashSet<String> = HashSet::new();

        for job_name in self.metrics.failing_jobs(self.failure_threshold) {
            if !handled.insert(job_name.clone()) {
                continue;
            }

            if self.is_cooling_down(&job_name) {
                info!("Skipping recovery of {}: restarted recently", job_name);
                report.skipped_jobs.push(job_name);
                continue;
            }

            // Cleared before dispatch, restored if admission rejects the restart.
            let Some(previous) = self.metrics.reset_consecutive_failures(&job_name) else {
                continue;
            };

            match self.executor.dispatch(&job_name, TriggerSource::Recovery) {
                Ok(execution_id) => {
                    warn!(
                        "Restarted failing job {} (execution_id: {})",
                        job_name, execution_id
                    );
                    metrics::record_recovery_action("job_restart");
                    self.mark_restarted(&job_name);
                    report.restarted_jobs.push(job_name.clone());

                    let reset = JobMetrics {
                        consecutive_failures: 0,
                        ..previous
                    };
                    self.store.save_metrics_snapshot(&job_name, &reset)?;
                }
                Err(e) => {
                    warn!("Could not restart failing job {}: {}", job_name, e);
                    self.metrics
                        .restore_consecutive_failures(&job_name, previous.consecutive_failures);
                    report.skipped_jobs.push(job_name);
                }
            }
        }

        let (previous, current) = self.limiter.reduce_limit(self.throttle_step);
        report.previous_limit = previous;
        report.current_limit = current;
        if current < previous {
            warn!("Throttled max concurrent jobs from {} to {}", previous, current);
            metrics::record_recovery_action("throttle");
            metrics::set_concurrency_limit(current);
            self.events.publish(SchedulerEvent::ConcurrencyThrottled {
                previous,
                current,
            });
        }

        Ok(report)
    }

    fn is_cooling_down(&self, job_name: &str) -> bool {
        let last_restart = self.last_restart.lock().unwrap_or_else(|e| e.into_inner());
        last_restart
            .get(job_name)
            .is_some_and(|at| at.elapsed() < self.recovery_delay)
    }

    fn mark_restarted(&self, job_name: &str) {
        self.last_restart
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_name.to_string(), Instant::now());
    }
}
