use super::error::SchedulerError;
use super::job::{JobDefinition, JobPriority};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

struct RegisteredJob {
    definition: Arc<JobDefinition>,
    enabled: bool,
    /// Registration order, used as a stable tie-breaker.
    seq: u64,
}

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<String, RegisteredJob>,
    next_seq: u64,
}

/// Serializable view of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub enabled: bool,
    pub priority: JobPriority,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Owns every job definition known to the engine.
///
/// Definitions are immutable once registered; only the enabled flag changes.
#[derive(Default)]
pub struct JobRegistry {
    state: RwLock<RegistryState>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, definition: JobDefinition) -> Result<Arc<JobDefinition>, SchedulerError> {
        let mut state = self.write();
        if state.jobs.contains_key(&definition.name) {
            return Err(SchedulerError::DuplicateJob(definition.name));
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let name = definition.name.clone();
        let enabled = definition.enabled;
        let definition = Arc::new(definition);
        info!(
            "Registering job: {} ({}, priority {})",
            name,
            definition.schedule.expression(),
            definition.priority.as_str()
        );
        state.jobs.insert(
            name,
            RegisteredJob {
                definition: Arc::clone(&definition),
                enabled,
                seq,
            },
        );
        Ok(definition)
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<JobDefinition>, SchedulerError> {
        self.write()
            .jobs
            .remove(name)
            .map(|job| job.definition)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))
    }

    pub fn enable(&self, name: &str) -> Result<(), SchedulerError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), SchedulerError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut state = self.write();
        let job = state
            .jobs
            .get_mut(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        job.enabled = enabled;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.read()
            .jobs
            .get(name)
            .map(|job| Arc::clone(&job.definition))
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.read().jobs.get(name).map(|job| job.enabled)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.read().jobs.keys().cloned().collect()
    }

    /// Enabled definitions ordered by descending priority, then registration
    /// order.
    pub fn list_enabled(&self) -> EnabledJobs {
        let state = self.read();
        let mut jobs: Vec<(JobPriority, u64, Arc<JobDefinition>)> = state
            .jobs
            .values()
            .filter(|job| job.enabled)
            .map(|job| (job.definition.priority, job.seq, Arc::clone(&job.definition)))
            .collect();
        jobs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        EnabledJobs {
            jobs: jobs.into_iter().map(|(_, _, def)| def).collect(),
        }
    }

    /// All jobs in registration order.
    pub fn list_all(&self) -> Vec<JobSummary> {
        let state = self.read();
        let mut jobs: Vec<&RegisteredJob> = state.jobs.values().collect();
        jobs.sort_by_key(|job| job.seq);
        jobs.into_iter()
            .map(|job| {
                let def = &job.definition;
                JobSummary {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    schedule: def.schedule.expression().to_string(),
                    enabled: job.enabled,
                    priority: def.priority,
                    timeout_ms: def.timeout.as_millis() as u64,
                    retry_attempts: def.retry_attempts,
                    retry_delay_ms: def.retry_delay.as_millis() as u64,
                }
            })
            .collect()
    }
}

/// A point-in-time ordering of the enabled jobs.
///
/// Iteration is lazy over the captured ordering and can be restarted any
/// number of times; later registry changes are not reflected.
#[derive(Clone, Default)]
pub struct EnabledJobs {
    jobs: Vec<Arc<JobDefinition>>,
}

impl EnabledJobs {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobDefinition>> + '_ {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<'a> IntoIterator for &'a EnabledJobs {
    type Item = &'a Arc<JobDefinition>;
    type IntoIter = std::slice::Iter<'a, Arc<JobDefinition>>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}
