//! Common test infrastructure
//!
//! Builds engines wired to an in-memory store, a controllable resource
//! sampler and a recording notifier.

mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{FailingStore, FakeSampler, RecordingNotifier, StalledNotifier};

use automation_scheduler::automation::{
    job_fn, AutomationEngine, JobDefinition, SchedulerConfig, SchedulerEvent,
};
use automation_scheduler::store::{ExecutionStore, SqliteExecutionStore};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Schedule that never fires during a test run.
pub const NEVER: &str = "0 0 1 1 *";

/// Schedule that fires every second.
pub const EVERY_SECOND: &str = "* * * * * *";

pub struct TestEngine {
    pub engine: AutomationEngine,
    pub store: Arc<SqliteExecutionStore>,
    pub sampler: Arc<FakeSampler>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestEngine {
    pub fn new(config: SchedulerConfig) -> Self {
        let store = Arc::new(SqliteExecutionStore::in_memory().unwrap());
        Self::with_store(config, store)
    }

    pub fn with_store(config: SchedulerConfig, store: Arc<SqliteExecutionStore>) -> Self {
        let sampler = Arc::new(FakeSampler::healthy());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = AutomationEngine::new(
            config,
            store.clone() as Arc<dyn ExecutionStore>,
            notifier.clone(),
            sampler.clone(),
        )
        .unwrap();
        Self {
            engine,
            store,
            sampler,
            notifier,
        }
    }
}

/// Config with background loops slow enough to stay out of the way.
#[allow(dead_code)]
pub fn quiet_config() -> SchedulerConfig {
    SchedulerConfig {
        health_check_interval: Duration::from_secs(3600),
        metrics_snapshot_interval: Duration::from_secs(3600),
        shutdown_grace: Duration::from_secs(5),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn ok_job(name: &str) -> JobDefinition {
    JobDefinition::new(name, NEVER, job_fn(|_| async { Ok(()) })).unwrap()
}

#[allow(dead_code)]
pub fn sleeping_job(name: &str, sleep: Duration) -> JobDefinition {
    JobDefinition::new(
        name,
        NEVER,
        job_fn(move |_| async move {
            tokio::time::sleep(sleep).await;
            Ok(())
        }),
    )
    .unwrap()
}

/// Job that always fails and counts its invocations.
#[allow(dead_code)]
pub fn failing_job(name: &str, calls: Arc<AtomicU32>) -> JobDefinition {
    JobDefinition::new(
        name,
        NEVER,
        job_fn(move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("handler exploded"))
            }
        }),
    )
    .unwrap()
}

/// Wait for the first event matching `predicate`.
#[allow(dead_code)]
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<SchedulerEvent>
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Every event already waiting in the receiver.
#[allow(dead_code)]
pub fn drain_events(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
