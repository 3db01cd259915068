mod models;
mod schema;
mod sqlite_mail_job_store;

pub use models::*;
pub use schema::MAIL_JOB_VERSIONED_SCHEMAS;
pub use sqlite_mail_job_store::SqliteMailJobStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Persistence collaborator for scheduled mail jobs.
///
/// The scheduler engine only talks to this trait; the underlying storage
/// technology is irrelevant to it.
pub trait MailJobStore: Send + Sync {
    fn insert(&self, job: &ScheduledMailJob) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<ScheduledMailJob>>;
    fn list_all(&self) -> Result<Vec<ScheduledMailJob>>;
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ScheduledMailJob>>;
    /// Update a job's status and armed fire time in a single statement, so
    /// a concurrent cancel or delete can never observe a partial write.
    fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    fn delete(&self, id: &str) -> Result<bool>;

    // Firing history
    fn record_run_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_run_finish(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<MailJobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<MailJobRun>>;
    fn list_recent_runs(&self, limit: usize) -> Result<Vec<MailJobRun>>;
    /// Mark runs left in `running` state by a previous process as failed.
    /// Called once at startup.
    fn mark_stale_runs_failed(&self) -> Result<usize>;
}
