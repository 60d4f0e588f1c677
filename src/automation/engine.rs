use super::config::SchedulerConfig;
use super::error::SchedulerError;
use super::events::{EventBus, SchedulerEvent};
use super::executor::{ExecutionReport, JobExecutor, TriggerSource};
use super::health::{HealthMonitor, ResourceSampler, SystemHealth};
use super::job::JobDefinition;
use super::limiter::ConcurrencyLimiter;
use super::metrics::{JobMetrics, MetricsCollector};
use super::planner::SchedulePlan;
use super::recovery::RecoveryManager;
use super::registry::{JobRegistry, JobSummary};
use crate::notifications::{AlertDispatcher, Notifier};
use crate::server::metrics;
use crate::store::{ExecutionStore, HealthSnapshot, JobExecution};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduling loop sleeps before re-reading the registry.
const MAX_SCHEDULER_SLEEP: Duration = Duration::from_secs(60);

/// How long aborted executions get to settle once the shutdown grace ran out.
const ABORT_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot returned by `AutomationEngine::get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub total_jobs: usize,
    pub enabled_jobs: usize,
    pub active_jobs: usize,
    /// Live concurrency ceiling, after any throttling.
    pub max_concurrent_jobs: usize,
    pub config: SchedulerConfig,
}

#[derive(Default)]
struct Lifecycle {
    shutdown_token: Option<CancellationToken>,
    loops: Vec<JoinHandle<()>>,
}

struct EngineInner {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<ConcurrencyLimiter>,
    executor: Arc<JobExecutor>,
    health: HealthMonitor,
    recovery: RecoveryManager,
    store: Arc<dyn ExecutionStore>,
    events: EventBus,

    /// Wakes the scheduling loop when the set of enabled jobs changes.
    schedule_changed: Notify,

    /// Serializes start and stop.
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    running: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

/// The automation scheduling engine.
///
/// Constructed once by its owner with configuration and collaborators; cheap
/// to clone, every clone drives the same engine.
#[derive(Clone)]
pub struct AutomationEngine {
    inner: Arc<EngineInner>,
}

impl AutomationEngine {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn Notifier>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let metrics = Arc::new(MetricsCollector::new());
        let limiter = ConcurrencyLimiter::new(config.max_concurrent_jobs);
        let events = EventBus::new(config.event_capacity);
        let alerts = AlertDispatcher::new(notifier, events.clone());

        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&limiter),
            Arc::clone(&metrics),
            Arc::clone(&store),
            events.clone(),
            alerts.clone(),
            config.failure_threshold,
        ));
        let health = HealthMonitor::new(
            sampler,
            Arc::clone(&metrics),
            Arc::clone(&limiter),
            config.failure_threshold,
        );
        let recovery = RecoveryManager::new(
            &config,
            Arc::clone(&metrics),
            Arc::clone(&limiter),
            Arc::clone(&executor),
            Arc::clone(&store),
            events.clone(),
            alerts,
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                metrics,
                limiter,
                executor,
                health,
                recovery,
                store,
                events,
                schedule_changed: Notify::new(),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
                running: AtomicBool::new(false),
                started_at: Mutex::new(None),
            }),
        })
    }

    // =========================================================================
    // Job management
    // =========================================================================

    pub fn register_job(&self, definition: JobDefinition) -> Result<(), SchedulerError> {
        let definition = self.inner.registry.register(definition)?;
        self.inner.metrics.ensure(&definition.name);
        self.inner.schedule_changed.notify_one();
        Ok(())
    }

    /// Remove a job. Its metrics are kept.
    pub fn unregister_job(&self, name: &str) -> Result<(), SchedulerError> {
        self.inner.registry.unregister(name)?;
        self.inner.schedule_changed.notify_one();
        Ok(())
    }

    /// Stop scheduling a job. Running executions are not affected.
    /// Returns `false` for unknown jobs.
    pub fn pause_job(&self, name: &str) -> bool {
        match self.inner.registry.disable(name) {
            Ok(()) => {
                info!("Paused job {}", name);
                self.inner.schedule_changed.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    /// Returns `false` for unknown jobs.
    pub fn resume_job(&self, name: &str) -> bool {
        match self.inner.registry.enable(name) {
            Ok(()) => {
                info!("Resumed job {}", name);
                self.inner.schedule_changed.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.inner.registry.list_all()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run a job now and wait for its outcome, retries included.
    pub async fn trigger_job(&self, name: &str) -> Result<ExecutionReport, SchedulerError> {
        self.inner.executor.run(name, TriggerSource::Manual).await
    }

    /// Run a job now in the background. Returns the execution id once admitted.
    pub fn dispatch_job(&self, name: &str) -> Result<String, SchedulerError> {
        self.inner.executor.dispatch(name, TriggerSource::Manual)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the scheduling, health and snapshot loops.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let inner = &self.inner;
        info!(
            "Starting automation engine with {} registered jobs",
            inner.registry.len()
        );

        match inner.store.mark_stale_executions_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale executions as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale executions: {:#}", e);
            }
        }

        if inner.config.enable_metrics {
            inner.hydrate_metrics();
            inner.persist_metrics_snapshot();
        }

        inner.executor.reopen();
        metrics::set_concurrency_limit(inner.limiter.limit());
        metrics::set_running_executions(inner.limiter.running());

        let shutdown_token = CancellationToken::new();
        lifecycle.loops.push(tokio::spawn(
            Arc::clone(inner).schedule_loop(shutdown_token.clone()),
        ));
        lifecycle.loops.push(tokio::spawn(
            Arc::clone(inner).health_loop(shutdown_token.clone()),
        ));
        if inner.config.enable_metrics {
            lifecycle.loops.push(tokio::spawn(
                Arc::clone(inner).snapshot_loop(shutdown_token.clone()),
            ));
        }
        lifecycle.shutdown_token = Some(shutdown_token);

        let started_at = Utc::now();
        *inner.lock_started_at() = Some(started_at);
        inner.running.store(true, Ordering::SeqCst);
        inner
            .events
            .publish(SchedulerEvent::SchedulerStarted { started_at });
        info!("Automation engine started");
        Ok(())
    }

    /// Stop the engine.
    ///
    /// Stops scheduling, waits up to `shutdown_grace` for in-flight executions,
    /// aborts whatever is left, then flushes metrics. Always completes; a
    /// no-op when the engine is not running.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !self.is_running() {
            return;
        }

        let inner = &self.inner;
        info!("Stopping automation engine...");

        if let Some(token) = lifecycle.shutdown_token.take() {
            token.cancel();
        }
        for handle in lifecycle.loops.drain(..) {
            if let Err(e) = handle.await {
                warn!("Engine loop ended abnormally: {}", e);
            }
        }

        inner.executor.close();
        let in_flight = inner.executor.running();
        if in_flight > 0 {
            info!("Waiting for {} in-flight executions to finish", in_flight);
        }
        if tokio::time::timeout(inner.config.shutdown_grace, inner.executor.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "Shutdown grace of {:?} elapsed, aborting {} executions",
                inner.config.shutdown_grace,
                inner.executor.running()
            );
            inner.executor.abort_in_flight();
            if tokio::time::timeout(ABORT_SETTLE_TIMEOUT, inner.executor.wait_idle())
                .await
                .is_err()
            {
                error!("Executions did not settle after abort, marking them failed");
                if let Err(e) = inner.store.mark_stale_executions_failed() {
                    error!("Failed to mark unsettled executions: {:#}", e);
                }
            }
        }

        if inner.config.enable_metrics {
            inner.persist_metrics_snapshot();
        }

        inner.running.store(false, Ordering::SeqCst);
        *inner.lock_started_at() = None;
        inner.events.publish(SchedulerEvent::SchedulerStopped {
            stopped_at: Utc::now(),
        });
        info!("Automation engine stopped");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        let started_at = *inner.lock_started_at();
        SchedulerStatus {
            is_running: self.is_running(),
            started_at,
            uptime_secs: started_at.map(|at| (Utc::now() - at).num_seconds()),
            total_jobs: inner.registry.len(),
            enabled_jobs: inner.registry.list_enabled().len(),
            active_jobs: inner.limiter.running(),
            max_concurrent_jobs: inner.limiter.limit(),
            config: inner.config.clone(),
        }
    }

    /// Metrics of one job, or of every job when `name` is `None`.
    pub fn get_job_metrics(
        &self,
        name: Option<&str>,
    ) -> Result<BTreeMap<String, JobMetrics>, SchedulerError> {
        match name {
            Some(name) => {
                let metrics = self
                    .inner
                    .metrics
                    .get(name)
                    .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
                Ok(BTreeMap::from([(name.to_string(), metrics)]))
            }
            None => Ok(self.inner.metrics.snapshot_all().into_iter().collect()),
        }
    }

    /// Evaluate health now without persisting or reacting to it.
    pub fn get_system_health(&self) -> SystemHealth {
        self.inner.health.check()
    }

    /// Run one full health tick: evaluate, persist, publish, recover.
    pub async fn run_health_check(&self) -> SystemHealth {
        self.inner.run_health_check().await
    }

    /// Persist the current metrics of every job. Returns how many were saved.
    pub fn persist_metrics_snapshot(&self) -> usize {
        self.inner.persist_metrics_snapshot()
    }

    pub fn get_execution_history(
        &self,
        name: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<JobExecution>> {
        self.inner.store.get_execution_history(name, limit)
    }

    pub fn get_recent_health(&self, limit: usize) -> anyhow::Result<Vec<HealthSnapshot>> {
        self.inner.store.get_recent_health(limit)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl EngineInner {
    fn lock_started_at(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.started_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hydrate_metrics(&self) {
        match self.store.load_latest_metrics() {
            Ok(snapshots) => {
                let mut hydrated = 0;
                for (job_name, snapshot) in snapshots {
                    if self.registry.contains(&job_name) {
                        self.metrics.hydrate(&job_name, snapshot);
                        hydrated += 1;
                    }
                }
                if hydrated > 0 {
                    info!("Restored metrics for {} jobs", hydrated);
                }
            }
            Err(e) => {
                error!("Failed to load persisted metrics: {:#}", e);
            }
        }
    }

    fn persist_metrics_snapshot(&self) -> usize {
        let mut saved = 0;
        for (job_name, job_metrics) in self.metrics.snapshot_all() {
            match self.store.save_metrics_snapshot(&job_name, &job_metrics) {
                Ok(()) => saved += 1,
                Err(e) => error!("Failed to persist metrics for {}: {:#}", job_name, e),
            }
        }
        debug!("Persisted metrics snapshot for {} jobs", saved);
        saved
    }

    async fn run_health_check(&self) -> SystemHealth {
        let health = self.health.check();
        debug!(
            "Health check: {} (load {:.1}%, memory {:.1}%, active {}, failed {})",
            health.status.as_str(),
            health.system_load,
            health.memory_usage,
            health.active_jobs,
            health.failed_jobs
        );
        metrics::record_health(health.status, health.system_load, health.memory_usage);

        if let Err(e) = self.store.save_health_snapshot(&health) {
            error!("Failed to persist health snapshot: {:#}", e);
        }
        self.events
            .publish(SchedulerEvent::HealthCheck(health.clone()));
        self.recovery.handle(&health).await;
        health
    }

    async fn schedule_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut plan = SchedulePlan::new();

        loop {
            let enabled = self.registry.list_enabled();

            // `enabled` is in priority order, so the due jobs are too.
            for definition in plan.take_due(&enabled, Utc::now()) {
                match self
                    .executor
                    .dispatch(&definition.name, TriggerSource::Schedule)
                {
                    Ok(execution_id) => {
                        debug!(
                            "Dispatched scheduled run of {} ({})",
                            definition.name, execution_id
                        );
                    }
                    Err(e) => {
                        warn!("Skipping scheduled run of {}: {}", definition.name, e);
                    }
                }
            }

            let sleep_duration = plan.sleep_duration(Utc::now(), MAX_SCHEDULER_SLEEP);
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {}
                _ = self.schedule_changed.notified() => {
                    debug!("Job set changed, re-reading registry");
                }
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Scheduling loop stopped");
    }

    async fn health_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            // A tick in progress must not hold up shutdown.
            tokio::select! {
                _ = self.run_health_check() => {}
                _ = shutdown.cancelled() => {
                    warn!("Health check interrupted by shutdown");
                    break;
                }
            }
        }

        debug!("Health loop stopped");
    }

    async fn snapshot_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics_snapshot_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.persist_metrics_snapshot();
                }
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Metrics snapshot loop stopped");
    }
}
