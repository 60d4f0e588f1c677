use super::error::SchedulerError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Global admission control for job executions.
///
/// The running count is only ever incremented through a single
/// compare-and-swap against the current limit, so two racing admissions at the
/// boundary cannot both succeed. The limit can only move down.
pub struct ConcurrencyLimiter {
    running: AtomicUsize,
    limit: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit.max(1)),
        })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Result<ExecutionPermit, SchedulerError> {
        let mut current = self.running.load(Ordering::SeqCst);
        loop {
            let limit = self.limit.load(Ordering::SeqCst);
            if current >= limit {
                return Err(SchedulerError::ConcurrencyLimitExceeded { limit });
            }
            match self.running.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Ok(ExecutionPermit {
                        limiter: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// Lower the limit by `step`, never below 1. Returns `(previous, current)`.
    ///
    /// Executions already admitted keep running; new admissions wait for the
    /// running count to drop below the new limit.
    pub fn reduce_limit(&self, step: usize) -> (usize, usize) {
        let previous = self
            .limit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |limit| {
                Some(limit.saturating_sub(step).max(1))
            })
            .unwrap_or_else(|limit| limit);
        (previous, previous.saturating_sub(step).max(1))
    }
}

/// One admitted execution slot. Dropping it frees the slot.
pub struct ExecutionPermit {
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        self.limiter.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ExecutionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPermit")
            .field("running", &self.limiter.running())
            .finish()
    }
}
