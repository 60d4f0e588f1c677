use super::job::JobDefinition;
use super::registry::EnabledJobs;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct PlannedRun {
    definition: Arc<JobDefinition>,
    next_run: DateTime<Utc>,
}

/// Next fire time of every enabled job, kept across scheduling passes.
///
/// Entries survive registry changes as long as the same definition stays
/// enabled, so a run that is due is never recomputed away.
#[derive(Default)]
pub(crate) struct SchedulePlan {
    runs: HashMap<String, PlannedRun>,
}

impl SchedulePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync with the enabled jobs and take those due at `now`, in the order
    /// of `enabled`. Taken jobs move on to their following fire time.
    pub fn take_due(&mut self, enabled: &EnabledJobs, now: DateTime<Utc>) -> Vec<Arc<JobDefinition>> {
        // Re-registered jobs are a new definition and start over.
        self.runs.retain(|name, run| {
            enabled
                .iter()
                .any(|d| &d.name == name && Arc::ptr_eq(d, &run.definition))
        });

        let mut due = Vec::new();
        for definition in enabled.iter() {
            match self.runs.get(&definition.name) {
                Some(run) if run.next_run <= now => due.push(Arc::clone(definition)),
                Some(_) => {}
                None => self.plan(definition, now),
            }
        }

        for definition in &due {
            self.plan(definition, now);
        }
        due
    }

    /// Time until the earliest planned run, capped at `max`.
    pub fn sleep_duration(&self, now: DateTime<Utc>, max: Duration) -> Duration {
        self.runs
            .values()
            .map(|run| run.next_run)
            .min()
            .map(|next_run| (next_run - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(max)
            .min(max)
    }

    fn plan(&mut self, definition: &Arc<JobDefinition>, now: DateTime<Utc>) {
        match definition.schedule.next_after(&now) {
            Some(next_run) => {
                self.runs.insert(
                    definition.name.clone(),
                    PlannedRun {
                        definition: Arc::clone(definition),
                        next_run,
                    },
                );
            }
            None => {
                debug!("Job {} has no upcoming runs", definition.name);
                self.runs.remove(&definition.name);
            }
        }
    }
}
