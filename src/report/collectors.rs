//! Built-in collectors.
//!
//! Domain collectors (alarms, utilization, maintenance, production) are
//! plugged in by the embedding system. The one collector shipped here
//! reports on the scheduler's own firing history, so a fresh deployment has
//! a working report type end to end.

use super::collector::{CollectError, ReportCollector};
use super::{ReportData, ReportDataset, SummaryMetric};
use crate::job_store::{MailJobStore, RunStatus};
use std::sync::Arc;

const DEFAULT_RUN_LIMIT: usize = 200;

/// Reports recent firings of all scheduled mail jobs.
///
/// Parameters: `{"limit": <max rows, default 200>}`.
pub struct SchedulerActivityCollector {
    store: Arc<dyn MailJobStore>,
}

impl SchedulerActivityCollector {
    pub fn new(store: Arc<dyn MailJobStore>) -> Self {
        Self { store }
    }
}

impl ReportCollector for SchedulerActivityCollector {
    fn description(&self) -> &str {
        "Recent firings of all scheduled mail jobs"
    }

    fn collect(&self, parameters: &serde_json::Value) -> Result<ReportData, CollectError> {
        let limit = parameters
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_RUN_LIMIT);

        let runs = self
            .store
            .list_recent_runs(limit)
            .map_err(|e| CollectError::new("loading firing history", e))?;

        let completed = runs
            .iter()
            .filter(|r| r.status == RunStatus::Completed)
            .count();
        let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();

        let rows = runs
            .iter()
            .map(|run| {
                vec![
                    run.job_id.clone(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    run.status.as_str().to_string(),
                    run.error_message.clone().unwrap_or_default(),
                    run.triggered_by.clone(),
                ]
            })
            .collect();

        Ok(ReportData::assemble(
            "scheduler-activity",
            "Scheduler Activity",
            parameters.clone(),
            None,
            vec![ReportDataset::new(
                "firings",
                vec![
                    "job_id".to_string(),
                    "started_at".to_string(),
                    "finished_at".to_string(),
                    "status".to_string(),
                    "error".to_string(),
                    "triggered_by".to_string(),
                ],
                rows,
            )],
            Some(vec![
                SummaryMetric::new("Firings", runs.len().to_string()),
                SummaryMetric::new("Completed", completed.to_string()),
                SummaryMetric::new("Failed", failed.to_string()),
            ]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::{ReportFormat, ScheduledMailJob, SqliteMailJobStore};
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;

    #[test]
    fn test_collects_firing_history() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteMailJobStore::new(temp_dir.path().join("jobs.db")).unwrap(),
        );

        let job = ScheduledMailJob::create(
            "alarms",
            "Alarm Summary",
            "ops@example.com",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            serde_json::json!({}),
            ReportFormat::Csv,
            None,
        );
        store.insert(&job).unwrap();

        let ok_run = store.record_run_start(&job.id, "schedule").unwrap();
        store
            .record_run_finish(ok_run, RunStatus::Completed, None)
            .unwrap();
        let bad_run = store.record_run_start(&job.id, "schedule").unwrap();
        store
            .record_run_finish(bad_run, RunStatus::Failed, Some("boom".to_string()))
            .unwrap();

        let collector = SchedulerActivityCollector::new(store);
        let report = collector.collect(&serde_json::json!({})).unwrap();

        assert_eq!(report.metadata.total_records, 2);
        assert_eq!(report.data.len(), 1);
        assert_eq!(report.data[0].source_name, "firings");

        let summary = report.summary.unwrap();
        let value_of = |name: &str| {
            summary
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.value.clone())
                .unwrap()
        };
        assert_eq!(value_of("Firings"), "2");
        assert_eq!(value_of("Completed"), "1");
        assert_eq!(value_of("Failed"), "1");
    }

    #[test]
    fn test_limit_parameter() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteMailJobStore::new(temp_dir.path().join("jobs.db")).unwrap(),
        );

        let job = ScheduledMailJob::create(
            "alarms",
            "Alarm Summary",
            "ops@example.com",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            serde_json::json!({}),
            ReportFormat::Csv,
            None,
        );
        store.insert(&job).unwrap();
        for _ in 0..5 {
            let run = store.record_run_start(&job.id, "schedule").unwrap();
            store
                .record_run_finish(run, RunStatus::Completed, None)
                .unwrap();
        }

        let collector = SchedulerActivityCollector::new(store);
        let report = collector.collect(&serde_json::json!({"limit": 2})).unwrap();
        assert_eq!(report.metadata.total_records, 2);
    }
}
