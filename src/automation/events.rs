use super::executor::TriggerSource;
use super::health::SystemHealth;
use super::recovery::RecoveryReport;
use crate::notifications::SystemAlert;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Lifecycle events published by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum SchedulerEvent {
    #[serde(rename = "scheduler:started")]
    SchedulerStarted { started_at: DateTime<Utc> },

    #[serde(rename = "scheduler:stopped")]
    SchedulerStopped { stopped_at: DateTime<Utc> },

    #[serde(rename = "job:started")]
    JobStarted {
        job_name: String,
        execution_id: String,
        trigger: TriggerSource,
    },

    #[serde(rename = "job:success")]
    JobSucceeded {
        job_name: String,
        execution_id: String,
        duration_ms: u64,
        attempts: u32,
    },

    #[serde(rename = "job:failed")]
    JobFailed {
        job_name: String,
        execution_id: String,
        duration_ms: u64,
        attempts: u32,
        error: String,
        timed_out: bool,
    },

    #[serde(rename = "job:recovery_needed")]
    JobRecoveryNeeded {
        job_name: String,
        consecutive_failures: u32,
    },

    #[serde(rename = "health:check")]
    HealthCheck(SystemHealth),

    #[serde(rename = "health:critical")]
    HealthCritical(SystemHealth),

    #[serde(rename = "recovery:success")]
    RecoverySucceeded(RecoveryReport),

    #[serde(rename = "recovery:failed")]
    RecoveryFailed { error: String },

    #[serde(rename = "concurrency:throttled")]
    ConcurrencyThrottled { previous: usize, current: usize },

    #[serde(rename = "alert")]
    Alert(SystemAlert),
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerEvent::SchedulerStarted { .. } => "scheduler:started",
            SchedulerEvent::SchedulerStopped { .. } => "scheduler:stopped",
            SchedulerEvent::JobStarted { .. } => "job:started",
            SchedulerEvent::JobSucceeded { .. } => "job:success",
            SchedulerEvent::JobFailed { .. } => "job:failed",
            SchedulerEvent::JobRecoveryNeeded { .. } => "job:recovery_needed",
            SchedulerEvent::HealthCheck(_) => "health:check",
            SchedulerEvent::HealthCritical(_) => "health:critical",
            SchedulerEvent::RecoverySucceeded(_) => "recovery:success",
            SchedulerEvent::RecoveryFailed { .. } => "recovery:failed",
            SchedulerEvent::ConcurrencyThrottled { .. } => "concurrency:throttled",
            SchedulerEvent::Alert(_) => "alert",
        }
    }
}

/// Typed publish/subscribe channel for `SchedulerEvent`s.
///
/// Publishing never blocks; slow subscribers observe `Lagged` and skip ahead.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: SchedulerEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for event {}", name);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus.publish(SchedulerEvent::JobSucceeded {
            job_name: "a".to_string(),
            execution_id: "a_1".to_string(),
            duration_ms: 12,
            attempts: 1,
        });
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "job:success");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(
            bus.publish(SchedulerEvent::RecoveryFailed {
                error: "boom".to_string()
            }),
            0
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = SchedulerEvent::JobFailed {
            job_name: "a".to_string(),
            execution_id: "a_1".to_string(),
            duration_ms: 50,
            attempts: 3,
            error: "Job a timed out after 50ms".to_string(),
            timed_out: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job:failed");
        assert_eq!(json["payload"]["job_name"], "a");
        assert_eq!(json["payload"]["timed_out"], true);

        let throttled = serde_json::to_value(SchedulerEvent::ConcurrencyThrottled {
            previous: 10,
            current: 8,
        })
        .unwrap();
        assert_eq!(throttled["event"], "concurrency:throttled");
        assert_eq!(throttled["payload"]["current"], 8);
    }
}
