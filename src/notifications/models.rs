//! Alert data models

use crate::automation::HealthIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    JobFailure,
    SystemCritical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A structured alert for the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub priority: AlertPriority,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl SystemAlert {
    /// A single job crossed the consecutive failure threshold.
    pub fn job_failure(job_name: &str, consecutive_failures: u32) -> Self {
        Self {
            alert_type: AlertType::JobFailure,
            title: format!("Job Failure Alert: {}", job_name),
            message: format!(
                "Job has failed {} times consecutively",
                consecutive_failures
            ),
            priority: AlertPriority::High,
            category: "job_monitoring".to_string(),
            created_at: Utc::now(),
        }
    }

    /// The scheduler as a whole reached critical health.
    pub fn system_critical(issues: &[HealthIssue]) -> Self {
        let issues = issues
            .iter()
            .map(|issue| issue.code())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            alert_type: AlertType::SystemCritical,
            title: "Scheduler Critical Health Alert".to_string(),
            message: format!("Scheduler health is critical: {}", issues),
            priority: AlertPriority::Critical,
            category: "system_health".to_string(),
            created_at: Utc::now(),
        }
    }
}
