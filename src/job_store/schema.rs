//! SQLite schema definitions for the mail job database.
//!
//! This module defines the tables for scheduled mail jobs and their
//! firing history.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Mail jobs
// =============================================================================

/// Mail jobs table - one row per scheduled report job
const MAIL_JOBS_TABLE_V1: Table = Table {
    name: "mail_jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true), // UUID
        sqlite_column!("report_type_id", &SqlType::Text, non_null = true),
        sqlite_column!("report_name", &SqlType::Text, non_null = true),
        sqlite_column!("email_recipient", &SqlType::Text, non_null = true),
        sqlite_column!("schedule_date", &SqlType::Text, non_null = true), // YYYY-MM-DD
        sqlite_column!("schedule_time", &SqlType::Text, non_null = true), // HH:MM:SS
        sqlite_column!("report_parameters", &SqlType::Text, non_null = true), // JSON
        sqlite_column!("report_format", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("is_recurring", &SqlType::Integer, non_null = true),
        sqlite_column!("recurrence_pattern", &SqlType::Text),
        sqlite_column!("next_fire_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true), // RFC3339
    ],
    indices: &[
        ("idx_mail_jobs_status", "status"),
        ("idx_mail_jobs_next_fire_at", "next_fire_at"),
    ],
};

// =============================================================================
// Version 2 - Firing history
// =============================================================================

/// Mail job runs table - one row per firing of a job
const MAIL_JOB_RUNS_TABLE_V2: Table = Table {
    name: "mail_job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_mail_job_runs_job_id_started", "job_id, started_at DESC"),
        ("idx_mail_job_runs_status", "status"),
    ],
};

/// Migration from version 1 to version 2: add firing history table
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE mail_job_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            error_message TEXT,
            triggered_by TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_mail_job_runs_job_id_started ON mail_job_runs(job_id, started_at DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_mail_job_runs_status ON mail_job_runs(status)",
        [],
    )?;
    Ok(())
}

// =============================================================================
// Versioned Schema Definition
// =============================================================================

/// All versioned schemas for the mail job database.
///
/// Version 1: Mail jobs table
/// Version 2: Firing history table
pub const MAIL_JOB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[MAIL_JOBS_TABLE_V1],
        migration: None, // Initial version has no migration
    },
    VersionedSchema {
        version: 2,
        tables: &[MAIL_JOBS_TABLE_V1, MAIL_JOB_RUNS_TABLE_V2],
        migration: Some(migrate_v1_to_v2),
    },
];
