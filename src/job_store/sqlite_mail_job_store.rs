use super::models::{
    JobStatus, MailJobRun, RecurrencePattern, ReportFormat, RunStatus, ScheduledMailJob,
};
use super::schema::MAIL_JOB_VERSIONED_SCHEMAS;
use super::MailJobStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteMailJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMailJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open mail job database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        if is_new_db {
            // Fresh database - create with latest schema
            info!("Creating new mail job database at {:?}", path);
            MAIL_JOB_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        } else {
            // Existing database - check version and migrate if needed
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 1 {
                anyhow::bail!(
                    "Mail job database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let current_schema_version = MAIL_JOB_VERSIONED_SCHEMAS.last().unwrap().version as i64;

            // Validate schema matches expected structure
            let version_index = MAIL_JOB_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown mail job database version {}", db_version))?;
            MAIL_JOB_VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Mail job database schema validation failed for version {}",
                        db_version
                    )
                })?;

            if db_version < current_schema_version {
                info!(
                    "Migrating mail job database from version {} to {}",
                    db_version, current_schema_version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in MAIL_JOB_VERSIONED_SCHEMAS.iter().skip(from_version) {
            if schema.version > from_version {
                info!(
                    "Running mail job database migration from version {} to {}",
                    latest_from, schema.version
                );
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ScheduledMailJob> {
        let schedule_date_str: String = row.get("schedule_date")?;
        let schedule_time_str: String = row.get("schedule_time")?;
        let parameters_str: String = row.get("report_parameters")?;
        let format_str: String = row.get("report_format")?;
        let status_str: String = row.get("status")?;
        let pattern_str: Option<String> = row.get("recurrence_pattern")?;
        let next_fire_at_str: Option<String> = row.get("next_fire_at")?;
        let created_at_str: String = row.get("created_at")?;
        let is_recurring: i64 = row.get("is_recurring")?;

        Ok(ScheduledMailJob {
            id: row.get("id")?,
            report_type_id: row.get("report_type_id")?,
            report_name: row.get("report_name")?,
            email_recipient: row.get("email_recipient")?,
            schedule_date: NaiveDate::parse_from_str(&schedule_date_str, "%Y-%m-%d")
                .unwrap_or_default(),
            schedule_time: NaiveTime::parse_from_str(&schedule_time_str, "%H:%M:%S")
                .unwrap_or_default(),
            report_parameters: serde_json::from_str(&parameters_str)
                .unwrap_or(serde_json::Value::Null),
            report_format: ReportFormat::parse(&format_str).unwrap_or(ReportFormat::Csv),
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed),
            is_recurring: is_recurring != 0,
            recurrence_pattern: pattern_str.as_deref().and_then(RecurrencePattern::parse),
            next_fire_at: next_fire_at_str.as_deref().map(Self::parse_datetime),
            created_at: Self::parse_datetime(&created_at_str),
        })
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<MailJobRun> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(MailJobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(&started_at_str),
            finished_at: finished_at_str.as_deref().map(Self::parse_datetime),
            status: RunStatus::parse(&status_str).unwrap_or(RunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }
}

const JOB_COLUMNS: &str = "id, report_type_id, report_name, email_recipient, schedule_date, \
     schedule_time, report_parameters, report_format, status, is_recurring, \
     recurrence_pattern, next_fire_at, created_at";

const RUN_COLUMNS: &str =
    "id, job_id, started_at, finished_at, status, error_message, triggered_by";

impl MailJobStore for SqliteMailJobStore {
    fn insert(&self, job: &ScheduledMailJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO mail_jobs ({JOB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                job.id,
                job.report_type_id,
                job.report_name,
                job.email_recipient,
                job.schedule_date.format("%Y-%m-%d").to_string(),
                job.schedule_time.format("%H:%M:%S").to_string(),
                job.report_parameters.to_string(),
                job.report_format.as_str(),
                job.status.as_str(),
                job.is_recurring as i64,
                job.recurrence_pattern.map(|p| p.as_str()),
                job.next_fire_at.as_ref().map(Self::format_datetime),
                Self::format_datetime(&job.created_at),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ScheduledMailJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM mail_jobs WHERE id = ?1"))?;

        let job = stmt.query_row(params![id], Self::row_to_job).optional()?;
        Ok(job)
    }

    fn list_all(&self) -> Result<Vec<ScheduledMailJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM mail_jobs ORDER BY created_at DESC"
        ))?;

        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ScheduledMailJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM mail_jobs WHERE status = ?1 ORDER BY created_at DESC"
        ))?;

        let jobs = stmt
            .query_map(params![status.as_str()], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mail_jobs SET status = ?1, next_fire_at = ?2 WHERE id = ?3",
            params![
                status.as_str(),
                next_fire_at.as_ref().map(Self::format_datetime),
                id
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM mail_jobs WHERE id = ?1", params![id])?;
        conn.execute("DELETE FROM mail_job_runs WHERE job_id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn record_run_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO mail_job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, now, RunStatus::Running.as_str(), triggered_by],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_run_finish(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE mail_job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![now, status.as_str(), error_message, run_id],
        )?;
        Ok(())
    }

    fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<MailJobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM mail_job_runs
             WHERE job_id = ?1 ORDER BY started_at DESC LIMIT ?2"
        ))?;

        let runs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<MailJobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM mail_job_runs
             WHERE job_id = ?1 ORDER BY started_at DESC LIMIT 1"
        ))?;

        let run = stmt
            .query_row(params![job_id], Self::row_to_run)
            .optional()?;
        Ok(run)
    }

    fn list_recent_runs(&self, limit: usize) -> Result<Vec<MailJobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM mail_job_runs ORDER BY started_at DESC LIMIT ?1"
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn mark_stale_runs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        // Runs still "running" at startup were interrupted by a restart
        let count = conn.execute(
            "UPDATE mail_job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                RunStatus::Failed.as_str(),
                now,
                "Firing was interrupted (server restart)",
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteMailJobStore,
        _temp_dir: TempDir, // Keep temp dir alive
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mail_jobs.db");
        let store = SqliteMailJobStore::new(&db_path).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn sample_job(recurrence: Option<RecurrencePattern>) -> ScheduledMailJob {
        ScheduledMailJob::create(
            "utilization",
            "Utilization Report",
            "plant-ops@example.com",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            serde_json::json!({"line_id": 3}),
            ReportFormat::Excel,
            recurrence,
        )
    }

    #[test]
    fn test_insert_and_get() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(Some(RecurrencePattern::Weekly));
        store.insert(&job).unwrap();

        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.report_type_id, "utilization");
        assert_eq!(loaded.report_name, "Utilization Report");
        assert_eq!(loaded.email_recipient, "plant-ops@example.com");
        assert_eq!(loaded.schedule_date, job.schedule_date);
        assert_eq!(loaded.schedule_time, job.schedule_time);
        assert_eq!(loaded.report_parameters, serde_json::json!({"line_id": 3}));
        assert_eq!(loaded.report_format, ReportFormat::Excel);
        assert_eq!(loaded.status, JobStatus::Scheduled);
        assert!(loaded.is_recurring);
        assert_eq!(loaded.recurrence_pattern, Some(RecurrencePattern::Weekly));
        assert!(loaded.next_fire_at.is_none());
    }

    #[test]
    fn test_get_nonexistent() {
        let test = create_test_store();
        assert!(test.store.get("no-such-id").unwrap().is_none());
    }

    #[test]
    fn test_list_by_status() {
        let test = create_test_store();
        let store = &test.store;

        let scheduled = sample_job(None);
        store.insert(&scheduled).unwrap();

        let done = sample_job(None);
        store.insert(&done).unwrap();
        store
            .update_status(&done.id, JobStatus::Completed, None)
            .unwrap();

        let jobs = store.list_by_status(JobStatus::Scheduled).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, scheduled.id);

        let jobs = store.list_by_status(JobStatus::Completed).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, done.id);

        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_update_status_with_next_fire() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(Some(RecurrencePattern::Daily));
        store.insert(&job).unwrap();

        let next = Utc::now() + chrono::Duration::days(1);
        store
            .update_status(&job.id, JobStatus::Scheduled, Some(next))
            .unwrap();

        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Scheduled);
        let stored_next = loaded.next_fire_at.unwrap();
        assert_eq!(stored_next.timestamp(), next.timestamp());

        // Clearing the fire time on completion
        store
            .update_status(&job.id, JobStatus::Completed, None)
            .unwrap();
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert!(loaded.next_fire_at.is_none());
    }

    #[test]
    fn test_delete() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(None);
        store.insert(&job).unwrap();
        let run_id = store.record_run_start(&job.id, "schedule").unwrap();
        store
            .record_run_finish(run_id, RunStatus::Completed, None)
            .unwrap();

        assert!(store.delete(&job.id).unwrap());
        assert!(store.get(&job.id).unwrap().is_none());
        assert!(store.get_runs(&job.id, 10).unwrap().is_empty());

        // Deleting again returns false
        assert!(!store.delete(&job.id).unwrap());
    }

    #[test]
    fn test_record_run_start_and_finish() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(None);
        store.insert(&job).unwrap();

        let run_id = store.record_run_start(&job.id, "schedule").unwrap();
        assert!(run_id > 0);

        let last = store.get_last_run(&job.id).unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Running);
        assert!(last.finished_at.is_none());
        assert_eq!(last.triggered_by, "schedule");

        store
            .record_run_finish(run_id, RunStatus::Completed, None)
            .unwrap();

        let last = store.get_last_run(&job.id).unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Completed);
        assert!(last.finished_at.is_some());
        assert!(last.error_message.is_none());
    }

    #[test]
    fn test_run_failure_records_error() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(None);
        store.insert(&job).unwrap();

        let run_id = store.record_run_start(&job.id, "schedule").unwrap();
        store
            .record_run_finish(
                run_id,
                RunStatus::Failed,
                Some("collector exploded".to_string()),
            )
            .unwrap();

        let last = store.get_last_run(&job.id).unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Failed);
        assert_eq!(last.error_message, Some("collector exploded".to_string()));
    }

    #[test]
    fn test_get_runs_limit() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(Some(RecurrencePattern::Daily));
        store.insert(&job).unwrap();

        for _ in 0..5 {
            let run_id = store.record_run_start(&job.id, "schedule").unwrap();
            store
                .record_run_finish(run_id, RunStatus::Completed, None)
                .unwrap();
        }

        let runs = store.get_runs(&job.id, 3).unwrap();
        assert_eq!(runs.len(), 3);

        let all = store.list_recent_runs(10).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_mark_stale_runs_failed() {
        let test = create_test_store();
        let store = &test.store;

        let job = sample_job(None);
        store.insert(&job).unwrap();
        store.record_run_start(&job.id, "schedule").unwrap();
        store.record_run_start(&job.id, "schedule").unwrap();

        let count = store.mark_stale_runs_failed().unwrap();
        assert_eq!(count, 2);

        let last = store.get_last_run(&job.id).unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Failed);
        assert!(last.error_message.unwrap().contains("server restart"));
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mail_jobs.db");

        let job = sample_job(Some(RecurrencePattern::Monthly));
        {
            let store = SqliteMailJobStore::new(&db_path).unwrap();
            store.insert(&job).unwrap();
        }

        // Reopening validates the schema and keeps the data
        let store = SqliteMailJobStore::new(&db_path).unwrap();
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.recurrence_pattern, Some(RecurrencePattern::Monthly));
    }
}
