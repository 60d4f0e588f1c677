//! Alert delivery: the notifier collaborator plus the engine event bus

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::automation::{EventBus, SchedulerEvent};

use super::models::{AlertPriority, SystemAlert};

/// Receives structured alerts. Delivery is opaque to the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &SystemAlert) -> anyhow::Result<()>;
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, alert: &SystemAlert) -> anyhow::Result<()> {
        match alert.priority {
            AlertPriority::Critical => error!(
                "[{}] {}: {}",
                alert.category, alert.title, alert.message
            ),
            _ => warn!("[{}] {}: {}", alert.category, alert.title, alert.message),
        }
        Ok(())
    }
}

/// Longest a single notifier call may take before the alert is given up on.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends an alert to the notifier and publishes it on the event bus.
#[derive(Clone)]
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    notify_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, events: EventBus) -> Self {
        Self {
            notifier,
            events,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    pub fn with_notify_timeout(mut self, notify_timeout: Duration) -> Self {
        self.notify_timeout = notify_timeout;
        self
    }

    /// Deliver an alert. Notifier failures and stalls are logged and never
    /// propagated.
    pub async fn dispatch(&self, alert: SystemAlert) {
        match tokio::time::timeout(self.notify_timeout, self.notifier.notify(&alert)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to deliver alert '{}': {:#}", alert.title, e),
            Err(_) => warn!(
                "Gave up delivering alert '{}' after {:?}",
                alert.title, self.notify_timeout
            ),
        }
        self.events.publish(SchedulerEvent::Alert(alert));
    }
}
