use super::context::JobContext;
use super::error::SchedulerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Relative importance of a job. Higher priorities are dispatched first when
/// several jobs are due on the same tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(JobPriority::Low),
            "medium" => Some(JobPriority::Medium),
            "high" => Some(JobPriority::High),
            "critical" => Some(JobPriority::Critical),
            _ => None,
        }
    }
}

/// A parsed cron schedule.
///
/// Accepts the classic 5-field form (`min hour dom month dow`) as well as the
/// 6/7-field form with seconds (and optional year). In the 5-field form,
/// numeric days of week follow the classic convention (0 or 7 is Sunday).
#[derive(Debug, Clone)]
pub struct JobSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl JobSchedule {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let normalized = normalize_expression(expression)?;
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| e.to_string())?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as written by the caller.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

fn normalize_expression(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = normalize_day_of_week(fields[4]);
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(format!("expected 5, 6 or 7 fields, got {}", n)),
    }
}

/// Rewrites classic numeric days of week (0-7, Sunday = 0 or 7) as names,
/// leaving step values untouched.
fn normalize_day_of_week(field: &str) -> String {
    const NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range
                .split('-')
                .map(|part| match part.parse::<usize>() {
                    Ok(n) if n < NAMES.len() => NAMES[n].to_string(),
                    _ => part.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// The body of a job, supplied by business-logic collaborators.
///
/// Handlers may be invoked several times for one execution (retry policy) and
/// must tolerate it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a job handler.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Immutable description of a schedulable job.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub description: String,
    pub schedule: JobSchedule,
    /// Initial enabled state; the registry owns the live flag.
    pub enabled: bool,
    pub priority: JobPriority,
    pub timeout: Duration,
    /// Additional attempts after the first failure.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub handler: Arc<dyn JobHandler>,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        schedule: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        let schedule =
            JobSchedule::parse(schedule).map_err(|reason| SchedulerError::InvalidSchedule {
                job_name: name.clone(),
                reason,
            })?;
        Ok(Self {
            name,
            description: String::new(),
            schedule,
            enabled: true,
            priority: JobPriority::default(),
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            handler,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule.expression())
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
