use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Output format of a rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Pdf,
    Excel,
    Csv,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Excel => "excel",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(ReportFormat::Pdf),
            "excel" => Some(ReportFormat::Excel),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }

    /// File extension for mailed artifacts.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Excel => "xlsx",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ReportFormat::Csv => "text/csv",
        }
    }
}

/// Lifecycle status of a scheduled mail job.
///
/// Transitions are forward-only: a completed or failed job is never
/// resurrected. A recurring job stays `Scheduled` across firings; its next
/// fire time is recomputed instead of creating a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(JobStatus::Scheduled),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Recurrence pattern for recurring jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(RecurrencePattern::Daily),
            "weekly" => Some(RecurrencePattern::Weekly),
            "monthly" => Some(RecurrencePattern::Monthly),
            _ => None,
        }
    }
}

/// A scheduled report mail job.
///
/// Invariant: `recurrence_pattern.is_some() == is_recurring`. Enforced at
/// creation through [`ScheduledMailJob::create`] and re-checked by the
/// trigger builder.
#[derive(Debug, Clone)]
pub struct ScheduledMailJob {
    pub id: String,
    pub report_type_id: String,
    pub report_name: String,
    pub email_recipient: String,
    /// Date of the first (or only) firing, server-local.
    pub schedule_date: NaiveDate,
    /// Wall-clock time of each firing, server-local.
    pub schedule_time: NaiveTime,
    /// Opaque filter bag passed through to the report collector.
    pub report_parameters: serde_json::Value,
    pub report_format: ReportFormat,
    pub status: JobStatus,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    /// Next armed fire instant, if any. Cleared on cancel and on terminal
    /// status transitions.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledMailJob {
    /// Build a new job record with a fresh id and `Scheduled` status.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        report_type_id: impl Into<String>,
        report_name: impl Into<String>,
        email_recipient: impl Into<String>,
        schedule_date: NaiveDate,
        schedule_time: NaiveTime,
        report_parameters: serde_json::Value,
        report_format: ReportFormat,
        recurrence_pattern: Option<RecurrencePattern>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            report_type_id: report_type_id.into(),
            report_name: report_name.into(),
            email_recipient: email_recipient.into(),
            schedule_date,
            schedule_time,
            report_parameters,
            report_format,
            status: JobStatus::Scheduled,
            is_recurring: recurrence_pattern.is_some(),
            recurrence_pattern,
            next_fire_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Outcome status of a single firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// History record of a single firing of a mail job.
#[derive(Debug, Clone)]
pub struct MailJobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    /// How the firing was triggered: "schedule" or "init".
    pub triggered_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_format_roundtrip() {
        for format in [ReportFormat::Pdf, ReportFormat::Excel, ReportFormat::Csv] {
            assert_eq!(ReportFormat::parse(format.as_str()), Some(format));
        }
        assert_eq!(ReportFormat::parse("docx"), None);
    }

    #[test]
    fn test_excel_extension_differs_from_name() {
        assert_eq!(ReportFormat::Excel.extension(), "xlsx");
        assert_eq!(ReportFormat::Excel.as_str(), "excel");
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [JobStatus::Scheduled, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_recurrence_pattern_roundtrip() {
        for pattern in [
            RecurrencePattern::Daily,
            RecurrencePattern::Weekly,
            RecurrencePattern::Monthly,
        ] {
            assert_eq!(RecurrencePattern::parse(pattern.as_str()), Some(pattern));
        }
        assert_eq!(RecurrencePattern::parse("yearly"), None);
    }

    #[test]
    fn test_create_sets_recurring_from_pattern() {
        let job = ScheduledMailJob::create(
            "alarms",
            "Alarm Summary",
            "ops@example.com",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            serde_json::json!({}),
            ReportFormat::Pdf,
            Some(RecurrencePattern::Weekly),
        );
        assert!(job.is_recurring);
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(job.next_fire_at.is_none());
        assert!(!job.id.is_empty());

        let one_shot = ScheduledMailJob::create(
            "alarms",
            "Alarm Summary",
            "ops@example.com",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            serde_json::json!({}),
            ReportFormat::Csv,
            None,
        );
        assert!(!one_shot.is_recurring);
        assert_ne!(one_shot.id, job.id);
    }
}
