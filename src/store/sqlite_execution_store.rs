use super::models::{ExecutionStatus, HealthSnapshot, JobExecution};
use super::schema::SCHEDULER_VERSIONED_SCHEMAS;
use super::ExecutionStore;
use crate::automation::{HealthStatus, JobMetrics, SystemHealth, TriggerSource};
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

const INTERRUPTED_MESSAGE: &str = "Execution was interrupted (scheduler restart)";

pub struct SqliteExecutionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open scheduler database")?;
        if is_new_db {
            info!("Creating new scheduler database at {:?}", path);
        }
        open_versioned(&mut conn, SCHEDULER_VERSIONED_SCHEMAS, is_new_db)
            .with_context(|| format!("Failed to prepare scheduler database at {:?}", path))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database with the latest schema.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        open_versioned(&mut conn, SCHEDULER_VERSIONED_SCHEMAS, true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<JobExecution> {
        let status_str: String = row.get("status")?;
        let trigger_str: String = row.get("triggered_by")?;
        let started_at_str: String = row.get("started_at")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;

        Ok(JobExecution {
            execution_id: row.get("execution_id")?,
            job_name: row.get("job_name")?,
            trigger: TriggerSource::parse(&trigger_str).unwrap_or(TriggerSource::Schedule),
            status: ExecutionStatus::parse(&status_str).unwrap_or(ExecutionStatus::Failed),
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            completed_at: completed_at_str.as_deref().and_then(Self::parse_datetime),
            duration_ms: row.get("duration_ms")?,
            error: row.get("error")?,
        })
    }

    fn row_to_health(row: &rusqlite::Row) -> rusqlite::Result<HealthSnapshot> {
        let status_str: String = row.get("status")?;
        let issues_str: String = row.get("issues")?;
        let checked_at_str: String = row.get("checked_at")?;
        let active_jobs: i64 = row.get("active_jobs")?;
        let failed_jobs: i64 = row.get("failed_jobs")?;

        Ok(HealthSnapshot {
            id: row.get("id")?,
            status: HealthStatus::parse(&status_str).unwrap_or(HealthStatus::Critical),
            active_jobs: active_jobs.max(0) as usize,
            failed_jobs: failed_jobs.max(0) as usize,
            system_load: row.get("system_load")?,
            memory_usage: row.get("memory_usage")?,
            issues: serde_json::from_str(&issues_str).unwrap_or_default(),
            checked_at: Self::parse_datetime(&checked_at_str).unwrap_or_else(Utc::now),
        })
    }

    fn row_to_metrics(row: &rusqlite::Row) -> rusqlite::Result<(String, JobMetrics)> {
        let total: i64 = row.get("total_executions")?;
        let successful: i64 = row.get("successful_executions")?;
        let failed: i64 = row.get("failed_executions")?;
        let consecutive: i64 = row.get("consecutive_failures")?;
        let last_execution_str: Option<String> = row.get("last_execution_time")?;

        Ok((
            row.get("job_name")?,
            JobMetrics {
                total_executions: total.max(0) as u64,
                successful_executions: successful.max(0) as u64,
                failed_executions: failed.max(0) as u64,
                consecutive_failures: consecutive.clamp(0, u32::MAX as i64) as u32,
                average_execution_time_ms: row.get("average_execution_time_ms")?,
                uptime: row.get("uptime")?,
                last_execution_time: last_execution_str.as_deref().and_then(Self::parse_datetime),
            },
        ))
    }
}

const EXECUTION_COLUMNS: &str =
    "execution_id, job_name, triggered_by, status, started_at, completed_at, duration_ms, error";

impl ExecutionStore for SqliteExecutionStore {
    fn record_execution_start(
        &self,
        execution_id: &str,
        job_name: &str,
        trigger: TriggerSource,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO job_executions (execution_id, job_name, triggered_by, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution_id,
                job_name,
                trigger.as_str(),
                ExecutionStatus::Running.as_str(),
                Self::format_datetime(&started_at)
            ],
        )?;
        Ok(())
    }

    fn record_execution_end(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        duration: Duration,
        completed_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE job_executions SET status = ?1, completed_at = ?2, duration_ms = ?3, error = ?4
             WHERE execution_id = ?5",
            params![
                status.as_str(),
                Self::format_datetime(&completed_at),
                duration.as_millis() as i64,
                error,
                execution_id
            ],
        )?;
        anyhow::ensure!(updated == 1, "Unknown execution id {}", execution_id);
        Ok(())
    }

    fn get_execution_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_executions WHERE job_name = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2",
            EXECUTION_COLUMNS
        ))?;
        let executions = stmt
            .query_map(params![job_name, limit as i64], Self::row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    fn get_running_executions(&self) -> Result<Vec<JobExecution>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_executions WHERE status = ?1 ORDER BY started_at DESC",
            EXECUTION_COLUMNS
        ))?;
        let executions = stmt
            .query_map(
                params![ExecutionStatus::Running.as_str()],
                Self::row_to_execution,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    fn mark_stale_executions_failed(&self) -> Result<usize> {
        let conn = self.lock();
        let now = Self::format_datetime(&Utc::now());
        let count = conn.execute(
            "UPDATE job_executions SET status = ?1, completed_at = ?2, error = ?3
             WHERE status = ?4",
            params![
                ExecutionStatus::Failed.as_str(),
                now,
                INTERRUPTED_MESSAGE,
                ExecutionStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn save_health_snapshot(&self, health: &SystemHealth) -> Result<()> {
        let conn = self.lock();
        let issues = serde_json::to_string(&health.issue_codes())?;
        conn.execute(
            "INSERT INTO scheduler_health
             (status, active_jobs, failed_jobs, system_load, memory_usage, issues, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                health.status.as_str(),
                health.active_jobs as i64,
                health.failed_jobs as i64,
                health.system_load,
                health.memory_usage,
                issues,
                Self::format_datetime(&health.last_health_check)
            ],
        )?;
        Ok(())
    }

    fn get_recent_health(&self, limit: usize) -> Result<Vec<HealthSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, status, active_jobs, failed_jobs, system_load, memory_usage, issues, checked_at
             FROM scheduler_health ORDER BY checked_at DESC, id DESC LIMIT ?1",
        )?;
        let snapshots = stmt
            .query_map(params![limit as i64], Self::row_to_health)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn save_metrics_snapshot(&self, job_name: &str, metrics: &JobMetrics) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO job_metrics
             (job_name, total_executions, successful_executions, failed_executions,
              consecutive_failures, average_execution_time_ms, uptime, last_execution_time, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job_name,
                metrics.total_executions as i64,
                metrics.successful_executions as i64,
                metrics.failed_executions as i64,
                metrics.consecutive_failures as i64,
                metrics.average_execution_time_ms,
                metrics.uptime,
                metrics.last_execution_time.as_ref().map(Self::format_datetime),
                Self::format_datetime(&Utc::now())
            ],
        )?;
        Ok(())
    }

    fn load_latest_metrics(&self) -> Result<Vec<(String, JobMetrics)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT job_name, total_executions, successful_executions, failed_executions,
                    consecutive_failures, average_execution_time_ms, uptime, last_execution_time
             FROM job_metrics
             WHERE id IN (SELECT MAX(id) FROM job_metrics GROUP BY job_name)
             ORDER BY job_name",
        )?;
        let metrics = stmt
            .query_map([], Self::row_to_metrics)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(metrics)
    }
}
