use tokio_util::sync::CancellationToken;

/// Context provided to a job handler for one attempt.
///
/// The engine owns no state the handler can reach through this; it only
/// identifies the attempt and carries the cancellation signal raised when the
/// attempt is abandoned (timeout) or aborted (shutdown).
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Unique id of the logical execution this attempt belongs to.
    pub execution_id: String,

    /// Name of the job being run.
    pub job_name: String,

    /// 1-based attempt number within the execution.
    pub attempt: u32,

    /// Token to check for cancellation requests.
    pub cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(
        execution_id: impl Into<String>,
        job_name: impl Into<String>,
        attempt: u32,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            job_name: job_name.into(),
            attempt,
            cancellation_token,
        }
    }

    /// Check if cancellation has been requested.
    ///
    /// Long-running handlers should check this periodically and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}
