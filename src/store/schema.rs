//! SQLite schema definitions for the scheduler database.
//!
//! Stores execution history, health snapshots and periodic metrics snapshots.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Executions and health snapshots
// =============================================================================

/// One row per logical execution, written at start and updated at settle.
const JOB_EXECUTIONS_TABLE_V1: Table = Table {
    name: "job_executions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("execution_id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("job_name", &SqlType::Text, non_null = true),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_executions_job_name", "job_name, started_at DESC"),
        ("idx_job_executions_status", "status"),
    ],
};

const SCHEDULER_HEALTH_TABLE_V1: Table = Table {
    name: "scheduler_health",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("active_jobs", &SqlType::Integer, non_null = true),
        sqlite_column!("failed_jobs", &SqlType::Integer, non_null = true),
        sqlite_column!("system_load", &SqlType::Real, non_null = true),
        sqlite_column!("memory_usage", &SqlType::Real, non_null = true),
        sqlite_column!("issues", &SqlType::Text, non_null = true), // JSON array of codes
        sqlite_column!("checked_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_scheduler_health_checked_at", "checked_at DESC")],
};

// =============================================================================
// Version 2 - Metrics snapshots
// =============================================================================

/// One row per job per snapshot.
const JOB_METRICS_TABLE_V2: Table = Table {
    name: "job_metrics",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_name", &SqlType::Text, non_null = true),
        sqlite_column!("total_executions", &SqlType::Integer, non_null = true),
        sqlite_column!("successful_executions", &SqlType::Integer, non_null = true),
        sqlite_column!("failed_executions", &SqlType::Integer, non_null = true),
        sqlite_column!("consecutive_failures", &SqlType::Integer, non_null = true),
        sqlite_column!("average_execution_time_ms", &SqlType::Real, non_null = true),
        sqlite_column!("uptime", &SqlType::Real, non_null = true),
        sqlite_column!("last_execution_time", &SqlType::Text),
        sqlite_column!("recorded_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_job_metrics_job_name", "job_name, recorded_at DESC")],
};

/// Migration from version 1 to version 2: add job_metrics table
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_METRICS_TABLE_V2.create(conn)
}

// =============================================================================
// Versioned Schema Definition
// =============================================================================

/// All versioned schemas for the scheduler database.
///
/// Version 1: Executions and health snapshots
/// Version 2: Metrics snapshots
pub const SCHEDULER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOB_EXECUTIONS_TABLE_V1, SCHEDULER_HEALTH_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            JOB_EXECUTIONS_TABLE_V1,
            SCHEDULER_HEALTH_TABLE_V1,
            JOB_METRICS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
