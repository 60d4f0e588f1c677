mod file_config;

pub use file_config::{FileConfig, JobFileConfig, SchedulerFileConfig};

use crate::automation::jobs::CommandHandler;
use crate::automation::{JobDefinition, JobPriority, JobSchedule, SchedulerConfig, SchedulerError};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub bind_address: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            port: 3100,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub bind_address: String,

    // Engine settings (with defaults)
    pub scheduler: SchedulerConfig,

    // Validated job definitions
    pub jobs: Vec<JobSettings>,
}

/// A validated `[[jobs]]` entry.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub enabled: bool,
    pub priority: JobPriority,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub command: CommandHandler,
}

impl JobSettings {
    fn resolve(file: JobFileConfig) -> Result<Self> {
        let name = file.name.trim().to_string();
        if name.is_empty() {
            bail!("Job name must not be empty");
        }

        JobSchedule::parse(&file.schedule)
            .map_err(|reason| anyhow::anyhow!("Invalid schedule for job {}: {}", name, reason))?;

        let priority = match file.priority {
            Some(p) => JobPriority::parse(&p)
                .with_context(|| format!("Unknown priority '{}' for job {}", p, name))?,
            None => JobPriority::default(),
        };

        let mut command = CommandHandler::from_command_line(&file.command)
            .with_context(|| format!("Invalid command for job {}", name))?;
        if let Some(dir) = file.working_dir {
            command = command.with_working_dir(dir);
        }

        Ok(Self {
            description: file.description.unwrap_or_default(),
            schedule: file.schedule,
            enabled: file.enabled.unwrap_or(true),
            priority,
            timeout: Duration::from_secs(file.timeout_secs.unwrap_or(DEFAULT_JOB_TIMEOUT_SECS)),
            retry_attempts: file.retry_attempts.unwrap_or(0),
            retry_delay: Duration::from_secs(
                file.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
            command,
            name,
        })
    }

    /// Build the engine definition running this job's command.
    pub fn to_definition(&self) -> Result<JobDefinition, SchedulerError> {
        Ok(JobDefinition::new(
            self.name.clone(),
            &self.schedule,
            Arc::new(self.command.clone()),
        )?
        .with_description(self.description.clone())
        .with_enabled(self.enabled)
        .with_priority(self.priority)
        .with_timeout(self.timeout)
        .with_retry(self.retry_attempts, self.retry_delay))
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let bind_address = file
            .bind_address
            .unwrap_or_else(|| cli.bind_address.clone());

        let scheduler = resolve_scheduler(file.scheduler.unwrap_or_default());
        scheduler.validate().context("Invalid [scheduler] settings")?;

        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(file.jobs.len());
        for job_file in file.jobs {
            let job = JobSettings::resolve(job_file)?;
            if !seen.insert(job.name.clone()) {
                bail!("Duplicate job name in config: {}", job.name);
            }
            jobs.push(job);
        }

        Ok(Self {
            db_dir,
            port,
            bind_address,
            scheduler,
            jobs,
        })
    }

    pub fn scheduler_db_path(&self) -> PathBuf {
        self.db_dir.join("scheduler.db")
    }
}

fn resolve_scheduler(file: SchedulerFileConfig) -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    SchedulerConfig {
        max_concurrent_jobs: file
            .max_concurrent_jobs
            .unwrap_or(defaults.max_concurrent_jobs),
        health_check_interval: file
            .health_check_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.health_check_interval),
        failure_threshold: file
            .failure_threshold
            .unwrap_or(defaults.failure_threshold),
        recovery_delay: file
            .recovery_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.recovery_delay),
        enable_metrics: file.enable_metrics.unwrap_or(defaults.enable_metrics),
        enable_auto_recovery: file
            .enable_auto_recovery
            .unwrap_or(defaults.enable_auto_recovery),
        metrics_snapshot_interval: file
            .metrics_snapshot_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.metrics_snapshot_interval),
        shutdown_grace: file
            .shutdown_grace_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace),
        throttle_step: file.throttle_step.unwrap_or(defaults.throttle_step),
        event_capacity: file.event_capacity.unwrap_or(defaults.event_capacity),
    }
}
