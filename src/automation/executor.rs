use super::context::JobContext;
use super::error::SchedulerError;
use super::events::{EventBus, SchedulerEvent};
use super::job::JobDefinition;
use super::limiter::{ConcurrencyLimiter, ExecutionPermit};
use super::metrics::MetricsCollector;
use super::registry::JobRegistry;
use crate::notifications::{AlertDispatcher, SystemAlert};
use crate::server::metrics;
use crate::store::{ExecutionStatus, ExecutionStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What caused an execution to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Manual,
    Recovery,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Schedule => "schedule",
            TriggerSource::Manual => "manual",
            TriggerSource::Recovery => "recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(TriggerSource::Schedule),
            "manual" => Some(TriggerSource::Manual),
            "recovery" => Some(TriggerSource::Recovery),
            _ => None,
        }
    }
}

/// Final outcome of one logical execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub job_name: String,
    pub trigger: TriggerSource,
    pub status: ExecutionStatus,
    /// Wall time from admission to settle, retries included.
    pub duration: Duration,
    pub attempts: u32,
    pub error: Option<SchedulerError>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<ExecutionReport, SchedulerError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// An execution that passed admission control and holds a slot.
struct Admission {
    definition: Arc<JobDefinition>,
    permit: ExecutionPermit,
    trigger: TriggerSource,
    execution_id: String,
}

/// Runs jobs under the global concurrency ceiling.
///
/// Each admitted execution holds an `ExecutionPermit` from admission until
/// settle. Attempts run in their own task so a timed out handler can be
/// abandoned without stalling the caller.
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    limiter: Arc<ConcurrencyLimiter>,
    metrics: Arc<MetricsCollector>,
    store: Arc<dyn ExecutionStore>,
    events: EventBus,
    alerts: AlertDispatcher,
    failure_threshold: u32,

    /// Tracks every in-flight execution, awaited or spawned.
    tracker: TaskTracker,

    /// Cancelled when shutdown gives up waiting. Replaced on every start.
    abort_token: Mutex<CancellationToken>,
}

impl JobExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<JobRegistry>,
        limiter: Arc<ConcurrencyLimiter>,
        metrics: Arc<MetricsCollector>,
        store: Arc<dyn ExecutionStore>,
        events: EventBus,
        alerts: AlertDispatcher,
        failure_threshold: u32,
    ) -> Self {
        Self {
            registry,
            limiter,
            metrics,
            store,
            events,
            alerts,
            failure_threshold,
            tracker: TaskTracker::new(),
            abort_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Run a job and wait for its final outcome.
    ///
    /// Fails immediately if the job is unknown or no slot is free. Otherwise
    /// the error of the last attempt is returned once retries are exhausted.
    /// The execution runs on its own task: dropping the returned future stops
    /// the wait, not the execution.
    pub async fn run(
        self: &Arc<Self>,
        job_name: &str,
        trigger: TriggerSource,
    ) -> Result<ExecutionReport, SchedulerError> {
        let admission = self.admit(job_name, trigger)?;
        let executor = Arc::clone(self);
        let handle = self
            .tracker
            .spawn(async move { executor.execute(admission).await });

        match handle.await {
            Ok(report) => report.into_result(),
            Err(join_error) => Err(SchedulerError::ExecutionFailed {
                job_name: job_name.to_string(),
                message: format!("Execution task failed: {}", join_error),
            }),
        }
    }

    /// Admit a job and run it in the background. Returns the execution id.
    pub fn dispatch(
        self: &Arc<Self>,
        job_name: &str,
        trigger: TriggerSource,
    ) -> Result<String, SchedulerError> {
        let admission = self.admit(job_name, trigger)?;
        let execution_id = admission.execution_id.clone();
        let executor = Arc::clone(self);
        self.tracker.spawn(async move {
            executor.execute(admission).await;
        });
        Ok(execution_id)
    }

    pub fn running(&self) -> usize {
        self.limiter.running()
    }

    pub fn is_accepting(&self) -> bool {
        !self.tracker.is_closed()
    }

    /// Accept executions again and arm a fresh abort token.
    pub fn reopen(&self) {
        *self.lock_abort_token() = CancellationToken::new();
        self.tracker.reopen();
    }

    /// Reject new executions. In-flight executions are unaffected.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Cancel every in-flight attempt. Their executions settle as failed.
    pub fn abort_in_flight(&self) {
        self.lock_abort_token().cancel();
    }

    /// Wait until the executor is closed and nothing is in flight.
    pub async fn wait_idle(&self) {
        self.tracker.wait().await;
    }

    fn lock_abort_token(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.abort_token.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self, job_name: &str, trigger: TriggerSource) -> Result<Admission, SchedulerError> {
        if self.tracker.is_closed() {
            return Err(SchedulerError::ShuttingDown);
        }

        let definition = self
            .registry
            .get(job_name)
            .ok_or_else(|| SchedulerError::JobNotFound(job_name.to_string()))?;

        let permit = self.limiter.try_acquire().inspect_err(|_| {
            metrics::record_admission_rejection(job_name, trigger.as_str());
        })?;
        metrics::set_running_executions(self.limiter.running());

        Ok(Admission {
            definition,
            permit,
            trigger,
            execution_id: format!("{}_{}", job_name, Uuid::new_v4()),
        })
    }

    async fn execute(&self, admission: Admission) -> ExecutionReport {
        let Admission {
            definition,
            permit,
            trigger,
            execution_id,
        } = admission;
        let job_name = definition.name.clone();
        let start_time = Instant::now();

        if let Err(e) =
            self.store
                .record_execution_start(&execution_id, &job_name, trigger, Utc::now())
        {
            error!("Failed to record execution start for {}: {:#}", job_name, e);
        }

        info!(
            "Starting job: {} (execution_id: {}, triggered_by: {})",
            job_name,
            execution_id,
            trigger.as_str()
        );
        self.events.publish(SchedulerEvent::JobStarted {
            job_name: job_name.clone(),
            execution_id: execution_id.clone(),
            trigger,
        });

        let abort_token = self.lock_abort_token().clone();
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let result = self
                .run_attempt(&definition, &execution_id, attempts, &abort_token)
                .await;

            match result {
                Ok(()) => break Ok(()),
                Err(e) if attempts <= definition.retry_attempts && !abort_token.is_cancelled() => {
                    warn!(
                        "Job {} attempt {}/{} failed: {}. Retrying in {:?}",
                        job_name,
                        attempts,
                        definition.retry_attempts + 1,
                        e,
                        definition.retry_delay
                    );
                    metrics::record_retry_attempt(&job_name);

                    let aborted = tokio::select! {
                        _ = tokio::time::sleep(definition.retry_delay) => false,
                        _ = abort_token.cancelled() => true,
                    };
                    if aborted {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let duration = start_time.elapsed();
        let completed_at = Utc::now();
        let status = match &outcome {
            Ok(()) => ExecutionStatus::Completed,
            Err(e) if e.is_timeout() => ExecutionStatus::TimedOut,
            Err(_) => ExecutionStatus::Failed,
        };

        let job_metrics = match &outcome {
            Ok(()) => self
                .metrics
                .record_success(&job_name, duration, completed_at),
            Err(_) => self
                .metrics
                .record_failure(&job_name, duration, completed_at),
        };

        if let Err(e) = self.store.record_execution_end(
            &execution_id,
            status,
            duration,
            completed_at,
            outcome.as_ref().err().map(|e| e.to_string()),
        ) {
            error!("Failed to record execution end for {}: {:#}", job_name, e);
        }

        metrics::record_job_execution(&job_name, status.as_str(), trigger.as_str(), duration);

        drop(permit);
        metrics::set_running_executions(self.limiter.running());

        let duration_ms = duration.as_millis() as u64;
        match &outcome {
            Ok(()) => {
                info!(
                    "Job {} completed successfully in {:?} ({} attempt(s))",
                    job_name, duration, attempts
                );
                self.events.publish(SchedulerEvent::JobSucceeded {
                    job_name: job_name.clone(),
                    execution_id: execution_id.clone(),
                    duration_ms,
                    attempts,
                });
            }
            Err(e) => {
                error!(
                    "Job {} failed after {:?} ({} attempt(s)): {}",
                    job_name, duration, attempts, e
                );
                self.events.publish(SchedulerEvent::JobFailed {
                    job_name: job_name.clone(),
                    execution_id: execution_id.clone(),
                    duration_ms,
                    attempts,
                    error: e.to_string(),
                    timed_out: e.is_timeout(),
                });

                if job_metrics.consecutive_failures >= self.failure_threshold {
                    warn!(
                        "Job {} reached {} consecutive failures",
                        job_name, job_metrics.consecutive_failures
                    );
                    self.events.publish(SchedulerEvent::JobRecoveryNeeded {
                        job_name: job_name.clone(),
                        consecutive_failures: job_metrics.consecutive_failures,
                    });
                    self.alerts
                        .dispatch(SystemAlert::job_failure(
                            &job_name,
                            job_metrics.consecutive_failures,
                        ))
                        .await;
                }
            }
        }

        ExecutionReport {
            execution_id,
            job_name,
            trigger,
            status,
            duration,
            attempts,
            error: outcome.err(),
        }
    }

    /// Run one handler attempt bounded by the job timeout.
    ///
    /// On timeout or abort the attempt's token is cancelled and its task
    /// aborted; the execution does not wait for the handler to stop.
    async fn run_attempt(
        &self,
        definition: &JobDefinition,
        execution_id: &str,
        attempt: u32,
        abort_token: &CancellationToken,
    ) -> Result<(), SchedulerError> {
        let attempt_token = abort_token.child_token();
        let ctx = JobContext::new(
            execution_id,
            definition.name.as_str(),
            attempt,
            attempt_token.clone(),
        );
        let handler = Arc::clone(&definition.handler);
        let mut task = tokio::spawn(async move { handler.run(ctx).await });

        tokio::select! {
            result = tokio::time::timeout(definition.timeout, &mut task) => match result {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(SchedulerError::ExecutionFailed {
                    job_name: definition.name.clone(),
                    message: format!("{:#}", e),
                }),
                Ok(Err(join_error)) => Err(SchedulerError::ExecutionFailed {
                    job_name: definition.name.clone(),
                    message: format!("Task panic: {}", join_error),
                }),
                Err(_) => {
                    debug!(
                        "Abandoning attempt {} of {} after {:?}",
                        attempt, definition.name, definition.timeout
                    );
                    attempt_token.cancel();
                    task.abort();
                    Err(SchedulerError::Timeout {
                        job_name: definition.name.clone(),
                        timeout: definition.timeout,
                    })
                }
            },
            _ = abort_token.cancelled() => {
                attempt_token.cancel();
                task.abort();
                Err(SchedulerError::ExecutionFailed {
                    job_name: definition.name.clone(),
                    message: "Execution aborted by scheduler shutdown".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::job::job_fn;
    use crate::notifications::Notifier;
    use crate::store::{MockExecutionStore, SqliteExecutionStore};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        alerts: Mutex<Vec<SystemAlert>>,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, alert: &SystemAlert) -> anyhow::Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Fixture {
        executor: Arc<JobExecutor>,
        registry: Arc<JobRegistry>,
        metrics: Arc<MetricsCollector>,
        store: Arc<SqliteExecutionStore>,
        notifier: Arc<CountingNotifier>,
    }

    fn fixture(limit: usize) -> Fixture {
        let registry = Arc::new(JobRegistry::new());
        let metrics = Arc::new(MetricsCollector::new());
        let store = Arc::new(SqliteExecutionStore::in_memory().unwrap());
        let notifier = Arc::new(CountingNotifier::default());
        let events = EventBus::new(64);
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&registry),
            ConcurrencyLimiter::new(limit),
            Arc::clone(&metrics),
            store.clone(),
            events.clone(),
            AlertDispatcher::new(notifier.clone(), events),
            2,
        ));
        Fixture {
            executor,
            registry,
            metrics,
            store,
            notifier,
        }
    }

    fn failing_job(name: &str, calls: Arc<AtomicU32>) -> JobDefinition {
        JobDefinition::new(
            name,
            "0 0 * * *",
            job_fn(move |_ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("boom"))
                }
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let f = fixture(2);
        let result = f.executor.run("missing", TriggerSource::Manual).await;
        assert_eq!(
            result.unwrap_err(),
            SchedulerError::JobNotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_success_updates_metrics_and_store() {
        let f = fixture(2);
        f.registry
            .register(JobDefinition::new("ok-job", "* * * * *", job_fn(|_| async { Ok(()) })).unwrap())
            .unwrap();

        let report = f.executor.run("ok-job", TriggerSource::Manual).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.attempts, 1);

        let metrics = f.metrics.get("ok-job").unwrap();
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.successful_executions, 1);

        let history = f.store.get_execution_history("ok-job", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Completed);
        assert_eq!(history[0].trigger, TriggerSource::Manual);
        assert_eq!(f.executor.running(), 0);
    }

    #[tokio::test]
    async fn test_retries_count_as_one_execution() {
        let f = fixture(2);
        let calls = Arc::new(AtomicU32::new(0));
        f.registry
            .register(
                failing_job("retry-job", Arc::clone(&calls))
                    .with_retry(2, Duration::from_millis(5)),
            )
            .unwrap();

        let err = f
            .executor
            .run("retry-job", TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let metrics = f.metrics.get("retry-job").unwrap();
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.failed_executions, 1);

        let history = f.store.get_execution_history("retry-job", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert!(history[0].error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_abandons_attempt() {
        let f = fixture(2);
        f.registry
            .register(
                JobDefinition::new(
                    "slow-job",
                    "* * * * *",
                    job_fn(|_| async {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok(())
                    }),
                )
                .unwrap()
                .with_timeout(Duration::from_millis(30)),
            )
            .unwrap();

        let start = Instant::now();
        let err = f
            .executor
            .run("slow-job", TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_millis(400));

        let history = f.store.get_execution_history("slow-job", 1).unwrap();
        assert_eq!(history[0].status, ExecutionStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_dispatch_respects_limit() {
        let f = fixture(1);
        f.registry
            .register(
                JobDefinition::new(
                    "held-job",
                    "* * * * *",
                    job_fn(|_| async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    }),
                )
                .unwrap(),
            )
            .unwrap();

        assert!(f.executor.dispatch("held-job", TriggerSource::Schedule).is_ok());
        assert_eq!(
            f.executor
                .dispatch("held-job", TriggerSource::Schedule)
                .unwrap_err(),
            SchedulerError::ConcurrencyLimitExceeded { limit: 1 }
        );

        f.executor.close();
        f.executor.wait_idle().await;
        assert_eq!(f.executor.running(), 0);
        assert_eq!(
            f.executor
                .dispatch("held-job", TriggerSource::Schedule)
                .unwrap_err(),
            SchedulerError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_threshold_sends_job_failure_alert() {
        let f = fixture(2);
        let calls = Arc::new(AtomicU32::new(0));
        f.registry
            .register(failing_job("flaky-job", calls))
            .unwrap();

        let _ = f.executor.run("flaky-job", TriggerSource::Schedule).await;
        assert!(f.notifier.alerts.lock().unwrap().is_empty());

        let _ = f.executor.run("flaky-job", TriggerSource::Schedule).await;
        let alerts = f.notifier.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Job Failure Alert: flaky-job");
    }

    #[tokio::test]
    async fn test_abort_fails_in_flight_execution() {
        let f = fixture(2);
        f.registry
            .register(
                JobDefinition::new(
                    "stuck-job",
                    "* * * * *",
                    job_fn(|_| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }),
                )
                .unwrap(),
            )
            .unwrap();

        let executor = Arc::clone(&f.executor);
        let run = tokio::spawn(async move { executor.run("stuck-job", TriggerSource::Manual).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.executor.abort_in_flight();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionFailed { .. }));
        assert_eq!(f.executor.running(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_abandon_execution() {
        let f = fixture(2);
        f.registry
            .register(
                JobDefinition::new(
                    "slow-job",
                    "* * * * *",
                    job_fn(|_| async {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok(())
                    }),
                )
                .unwrap(),
            )
            .unwrap();

        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            f.executor.run("slow-job", TriggerSource::Manual),
        )
        .await;
        assert!(waited.is_err());

        f.executor.close();
        tokio::time::timeout(Duration::from_secs(2), f.executor.wait_idle())
            .await
            .unwrap();

        let history = f.store.get_execution_history("slow-job", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Completed);
        assert_eq!(f.metrics.get("slow-job").unwrap().total_executions, 1);
        assert_eq!(f.executor.running(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failures_are_contained() {
        let mut store = MockExecutionStore::new();
        store
            .expect_record_execution_start()
            .returning(|_, _, _, _| Err(anyhow!("disk full")));
        store
            .expect_record_execution_end()
            .returning(|_, _, _, _, _| Err(anyhow!("disk full")));

        let registry = Arc::new(JobRegistry::new());
        let events = EventBus::new(16);
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&registry),
            ConcurrencyLimiter::new(1),
            Arc::new(MetricsCollector::new()),
            Arc::new(store),
            events.clone(),
            AlertDispatcher::new(Arc::new(CountingNotifier::default()), events),
            3,
        ));
        registry
            .register(JobDefinition::new("ok-job", "* * * * *", job_fn(|_| async { Ok(()) })).unwrap())
            .unwrap();

        let report = executor.run("ok-job", TriggerSource::Manual).await.unwrap();
        assert!(report.is_success());
    }

    #[test]
    fn test_trigger_source_round_trip() {
        for trigger in [
            TriggerSource::Schedule,
            TriggerSource::Manual,
            TriggerSource::Recovery,
        ] {
            assert_eq!(TriggerSource::parse(trigger.as_str()), Some(trigger));
        }
        assert_eq!(TriggerSource::parse("hook"), None);
    }
}
