use super::trigger::ScheduleError;
use crate::job_store::{MailJobRun, MailJobStore, ScheduledMailJob};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),
    #[error("job is not in a schedulable state")]
    NotSchedulable,
    #[error("scheduler is not available")]
    Unavailable,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Command sent from the handle to the scheduler coordinator.
pub enum SchedulerCommand {
    Arm {
        job_id: String,
        response: oneshot::Sender<Result<DateTime<Utc>, SchedulerError>>,
    },
    Cancel {
        job_id: String,
        response: oneshot::Sender<bool>,
    },
    Initialize {
        response: oneshot::Sender<Result<usize, SchedulerError>>,
    },
}

/// An armed timer entry. The generation distinguishes a live timer from
/// stale heap entries left behind by re-arms and cancels.
#[derive(Debug, Clone, Copy)]
pub struct ArmedTimer {
    pub fire_at: DateTime<Utc>,
    pub generation: u64,
}

/// State shared between the scheduler coordinator and its handle.
pub struct SharedSchedulerState {
    /// Jobs with a live timer, by job id. This map is authoritative; the
    /// coordinator's heap is only an ordering index over it.
    pub armed: HashMap<String, ArmedTimer>,
    /// Jobs whose firing is currently executing.
    pub in_flight: HashSet<String>,
    /// Jobs cancelled while their firing was executing; the in-flight
    /// firing completes, then the cancellation suppresses the re-arm.
    pub cancelled_in_flight: HashSet<String>,
    pub is_initialized: bool,
    next_generation: u64,
}

impl SharedSchedulerState {
    pub fn new() -> Self {
        Self {
            armed: HashMap::new(),
            in_flight: HashSet::new(),
            cancelled_in_flight: HashSet::new(),
            is_initialized: false,
            next_generation: 0,
        }
    }

    pub fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

impl Default for SharedSchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable firing history entry for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<MailJobRun> for RunInfo {
    fn from(run: MailJobRun) -> Self {
        RunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

/// Serializable job information for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub report_type_id: String,
    pub report_name: String,
    pub email_recipient: String,
    pub schedule_date: String,
    pub schedule_time: String,
    pub report_parameters: serde_json::Value,
    pub report_format: String,
    pub status: String,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<String>,
    pub is_armed: bool,
    pub next_fire_at: Option<String>,
    pub created_at: String,
    pub last_run: Option<RunInfo>,
}

impl JobInfo {
    fn build(job: &ScheduledMailJob, is_armed: bool, last_run: Option<MailJobRun>) -> Self {
        JobInfo {
            id: job.id.clone(),
            report_type_id: job.report_type_id.clone(),
            report_name: job.report_name.clone(),
            email_recipient: job.email_recipient.clone(),
            schedule_date: job.schedule_date.format("%Y-%m-%d").to_string(),
            schedule_time: job.schedule_time.format("%H:%M:%S").to_string(),
            report_parameters: job.report_parameters.clone(),
            report_format: job.report_format.as_str().to_string(),
            status: job.status.as_str().to_string(),
            is_recurring: job.is_recurring,
            recurrence_pattern: job.recurrence_pattern.map(|p| p.as_str().to_string()),
            is_armed,
            next_fire_at: job.next_fire_at.map(|dt| dt.to_rfc3339()),
            created_at: job.created_at.to_rfc3339(),
            last_run: last_run.map(RunInfo::from),
        }
    }
}

/// Handle for interacting with the scheduler from HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared: Arc<RwLock<SharedSchedulerState>>,
    store: Arc<dyn MailJobStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared: Arc<RwLock<SharedSchedulerState>>,
        store: Arc<dyn MailJobStore>,
    ) -> Self {
        Self {
            command_tx,
            shared,
            store,
        }
    }

    /// Arm (or re-arm) the timer for a job. Returns the armed fire instant.
    pub async fn arm(&self, job_id: &str) -> Result<DateTime<Utc>, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Arm {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::Unavailable)?;
        response_rx.await.map_err(|_| SchedulerError::Unavailable)?
    }

    /// Clear any pending timer for a job. Safe to call on a job with no
    /// active timer; returns whether a timer or in-flight firing existed.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Cancel {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::Unavailable)?;
        response_rx.await.map_err(|_| SchedulerError::Unavailable)
    }

    /// Load all scheduled jobs from the store and arm each. Idempotent:
    /// re-arming replaces existing timers. Returns the number of armed jobs.
    pub async fn initialize(&self) -> Result<usize, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Initialize {
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::Unavailable)?;
        response_rx.await.map_err(|_| SchedulerError::Unavailable)?
    }

    /// Number of jobs with a currently armed timer.
    pub async fn active_count(&self) -> usize {
        self.shared.read().await.armed.len()
    }

    pub async fn is_initialized(&self) -> bool {
        self.shared.read().await.is_initialized
    }

    pub async fn is_armed(&self, job_id: &str) -> bool {
        self.shared.read().await.armed.contains_key(job_id)
    }

    pub async fn armed_fire_at(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.shared.read().await.armed.get(job_id).map(|t| t.fire_at)
    }

    /// Job information for API responses, including timer and last-run state.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>, SchedulerError> {
        let jobs = self
            .store
            .list_all()
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;

        let shared = self.shared.read().await;
        let mut infos = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let last_run = self
                .store
                .get_last_run(&job.id)
                .map_err(|e| SchedulerError::Storage(e.to_string()))?;
            infos.push(JobInfo::build(
                job,
                shared.armed.contains_key(&job.id),
                last_run,
            ));
        }
        Ok(infos)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>, SchedulerError> {
        let job = self
            .store
            .get(job_id)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        let Some(job) = job else {
            return Ok(None);
        };
        let last_run = self
            .store
            .get_last_run(&job.id)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        let is_armed = self.is_armed(job_id).await;
        Ok(Some(JobInfo::build(&job, is_armed, last_run)))
    }

    pub fn get_job_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunInfo>, SchedulerError> {
        let runs = self
            .store
            .get_runs(job_id, limit)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        Ok(runs.into_iter().map(RunInfo::from).collect())
    }
}
