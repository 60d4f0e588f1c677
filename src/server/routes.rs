//! Admin HTTP API for the automation engine.

use super::metrics::metrics_handler;
use crate::automation::{AutomationEngine, SchedulerError};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulerError::JobNotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::DuplicateJob(_) | SchedulerError::AlreadyRunning => {
                StatusCode::CONFLICT
            }
            SchedulerError::ConcurrencyLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            SchedulerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            SchedulerError::InvalidSchedule { .. } => StatusCode::BAD_REQUEST,
            SchedulerError::Timeout { .. } | SchedulerError::ExecutionFailed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Store failures on read endpoints.
struct StoreError(anyhow::Error);

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        error!("Store query failed: {:#}", self.0);
        let body = ErrorBody {
            error: "store_unavailable",
            message: format!("{:#}", self.0),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Serialize)]
struct TriggerResponse {
    job_name: String,
    execution_id: String,
}

#[derive(Serialize)]
struct JobStateResponse {
    job_name: String,
    enabled: bool,
}

async fn get_status(State(engine): State<AutomationEngine>) -> impl IntoResponse {
    Json(engine.get_status())
}

async fn get_health(State(engine): State<AutomationEngine>) -> impl IntoResponse {
    Json(engine.get_system_health())
}

async fn get_health_history(
    State(engine): State<AutomationEngine>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, StoreError> {
    let snapshots = engine
        .get_recent_health(query.limit())
        .map_err(StoreError)?;
    Ok(Json(snapshots))
}

async fn list_jobs(State(engine): State<AutomationEngine>) -> impl IntoResponse {
    Json(engine.list_jobs())
}

async fn get_all_metrics(
    State(engine): State<AutomationEngine>,
) -> Result<impl IntoResponse, SchedulerError> {
    Ok(Json(engine.get_job_metrics(None)?))
}

async fn get_job_metrics(
    State(engine): State<AutomationEngine>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SchedulerError> {
    Ok(Json(engine.get_job_metrics(Some(&name))?))
}

async fn get_job_history(
    State(engine): State<AutomationEngine>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Response, StoreError> {
    if engine.get_job_metrics(Some(&name)).is_err() {
        return Ok(SchedulerError::JobNotFound(name).into_response());
    }
    let executions = engine
        .get_execution_history(&name, query.limit())
        .map_err(StoreError)?;
    Ok(Json(executions).into_response())
}

async fn trigger_job(
    State(engine): State<AutomationEngine>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SchedulerError> {
    let execution_id = engine.dispatch_job(&name)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job_name: name,
            execution_id,
        }),
    ))
}

async fn pause_job(
    State(engine): State<AutomationEngine>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SchedulerError> {
    if !engine.pause_job(&name) {
        return Err(SchedulerError::JobNotFound(name));
    }
    Ok(Json(JobStateResponse {
        job_name: name,
        enabled: false,
    }))
}

async fn resume_job(
    State(engine): State<AutomationEngine>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SchedulerError> {
    if !engine.resume_job(&name) {
        return Err(SchedulerError::JobNotFound(name));
    }
    Ok(Json(JobStateResponse {
        job_name: name,
        enabled: true,
    }))
}

async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let uri = request.uri().to_string();
    debug!(">>> {} {}", method, uri);

    let response = next.run(request).await;

    info!(
        "<<< {} {} {} ({:?})",
        method,
        uri,
        response.status().as_u16(),
        start.elapsed()
    );
    response
}

pub fn make_admin_router(engine: AutomationEngine) -> Router {
    let scheduler_routes: Router = Router::new()
        .route("/status", get(get_status))
        .route("/health", get(get_health))
        .route("/health/history", get(get_health_history))
        .route("/jobs", get(list_jobs))
        .route("/metrics", get(get_all_metrics))
        .route("/jobs/{name}/metrics", get(get_job_metrics))
        .route("/jobs/{name}/history", get(get_job_history))
        .route("/jobs/{name}/trigger", post(trigger_job))
        .route("/jobs/{name}/pause", post(pause_job))
        .route("/jobs/{name}/resume", post(resume_job))
        .with_state(engine);

    Router::new()
        .route("/metrics", get(metrics_handler))
        .nest("/v1/scheduler", scheduler_routes)
        .layer(middleware::from_fn(log_requests))
}

/// Serve the admin API until `shutdown` is cancelled.
pub async fn run_admin_server(
    engine: AutomationEngine,
    bind_address: String,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = make_admin_router(engine);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_address, port))
        .await
        .with_context(|| format!("Failed to bind admin server to {}:{}", bind_address, port))?;
    info!("Admin server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
