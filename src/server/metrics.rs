use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

use crate::automation::HealthStatus;

/// Metric name prefix for all scheduler metrics
const PREFIX: &str = "scheduler";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Execution Metrics
    pub static ref JOB_EXECUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Total logical job executions by outcome"),
        &["job", "status", "trigger"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_EXECUTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_execution_duration_seconds"),
            "Job execution duration in seconds, retries included"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0]),
        &["job"]
    ).expect("Failed to create job_execution_duration_seconds metric");

    pub static ref JOB_RETRY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_job_retry_attempts_total"), "Handler re-invocations caused by the retry policy"),
        &["job"]
    ).expect("Failed to create job_retry_attempts_total metric");

    pub static ref ADMISSION_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_admission_rejections_total"), "Triggers rejected by admission control"),
        &["job", "trigger"]
    ).expect("Failed to create admission_rejections_total metric");

    // Concurrency Metrics
    pub static ref RUNNING_EXECUTIONS: IntGauge = IntGauge::new(
        format!("{PREFIX}_running_executions"),
        "Executions currently holding a concurrency slot"
    ).expect("Failed to create running_executions metric");

    pub static ref CONCURRENCY_LIMIT: IntGauge = IntGauge::new(
        format!("{PREFIX}_concurrency_limit"),
        "Current maximum number of concurrent executions"
    ).expect("Failed to create concurrency_limit metric");

    // Health Metrics
    pub static ref HEALTH_STATUS: IntGauge = IntGauge::new(
        format!("{PREFIX}_health_status"),
        "Last health verdict (0 = healthy, 1 = degraded, 2 = critical)"
    ).expect("Failed to create health_status metric");

    pub static ref SYSTEM_LOAD_PERCENT: Gauge = Gauge::new(
        format!("{PREFIX}_system_load_percent"),
        "Host CPU load sampled by the last health check"
    ).expect("Failed to create system_load_percent metric");

    pub static ref MEMORY_USAGE_PERCENT: Gauge = Gauge::new(
        format!("{PREFIX}_memory_usage_percent"),
        "Host memory usage sampled by the last health check"
    ).expect("Failed to create memory_usage_percent metric");

    // Recovery Metrics
    pub static ref RECOVERY_ACTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_recovery_actions_total"), "Recovery actions taken"),
        &["action"]
    ).expect("Failed to create recovery_actions_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_EXECUTION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RETRY_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ADMISSION_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RUNNING_EXECUTIONS.clone()));
    let _ = REGISTRY.register(Box::new(CONCURRENCY_LIMIT.clone()));
    let _ = REGISTRY.register(Box::new(HEALTH_STATUS.clone()));
    let _ = REGISTRY.register(Box::new(SYSTEM_LOAD_PERCENT.clone()));
    let _ = REGISTRY.register(Box::new(MEMORY_USAGE_PERCENT.clone()));
    let _ = REGISTRY.register(Box::new(RECOVERY_ACTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a settled execution
pub fn record_job_execution(job: &str, status: &str, trigger: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job, status, trigger])
        .inc();
    JOB_EXECUTION_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn record_retry_attempt(job: &str) {
    JOB_RETRY_ATTEMPTS_TOTAL.with_label_values(&[job]).inc();
}

pub fn record_admission_rejection(job: &str, trigger: &str) {
    ADMISSION_REJECTIONS_TOTAL
        .with_label_values(&[job, trigger])
        .inc();
}

pub fn set_running_executions(count: usize) {
    RUNNING_EXECUTIONS.set(count as i64);
}

pub fn set_concurrency_limit(limit: usize) {
    CONCURRENCY_LIMIT.set(limit as i64);
}

/// Record the outcome of a health tick
pub fn record_health(status: HealthStatus, system_load: f64, memory_usage: f64) {
    let value = match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Degraded => 1,
        HealthStatus::Critical => 2,
    };
    HEALTH_STATUS.set(value);
    SYSTEM_LOAD_PERCENT.set(system_load);
    MEMORY_USAGE_PERCENT.set(memory_usage);
}

/// Record a recovery action (`job_restart`, `throttle`, `failed`)
pub fn record_recovery_action(action: &str) {
    RECOVERY_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok());
            if let Some(kb) = rss_kb {
                PROCESS_MEMORY_BYTES.set(kb * 1024.0);
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
