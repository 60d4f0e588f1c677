use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub bind_address: Option<String>,

    // Engine settings
    pub scheduler: Option<SchedulerFileConfig>,

    // Job definitions, one `[[jobs]]` table each
    pub jobs: Vec<JobFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerFileConfig {
    pub max_concurrent_jobs: Option<usize>,
    pub health_check_interval_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub recovery_delay_secs: Option<u64>,
    pub enable_metrics: Option<bool>,
    pub enable_auto_recovery: Option<bool>,
    pub metrics_snapshot_interval_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub throttle_step: Option<usize>,
    pub event_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobFileConfig {
    pub name: String,
    pub description: Option<String>,
    /// Cron expression, 5 fields (minute first) or 6/7 fields (seconds first).
    pub schedule: String,
    pub enabled: Option<bool>,
    /// "low", "medium", "high" or "critical"
    pub priority: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    /// Shell-style command line run by the job.
    pub command: String,
    pub working_dir: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/var/lib/scheduler"
            port = 4100

            [scheduler]
            max_concurrent_jobs = 4
            health_check_interval_secs = 30
            enable_auto_recovery = false

            [[jobs]]
            name = "license-expiry"
            schedule = "0 9 * * *"
            priority = "high"
            timeout_secs = 120
            retry_attempts = 2
            command = "/usr/local/bin/check-licenses --notify"

            [[jobs]]
            name = "usage-aggregation"
            schedule = "*/15 * * * *"
            enabled = false
            command = "aggregate-usage"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/var/lib/scheduler"));
        assert_eq!(config.port, Some(4100));
        let scheduler = config.scheduler.unwrap();
        assert_eq!(scheduler.max_concurrent_jobs, Some(4));
        assert_eq!(scheduler.enable_auto_recovery, Some(false));
        assert_eq!(scheduler.failure_threshold, None);
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].retry_attempts, Some(2));
        assert_eq!(config.jobs[1].enabled, Some(false));
    }

    #[test]
    fn test_empty_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/scheduler.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
