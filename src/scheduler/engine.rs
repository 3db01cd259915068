use super::handle::{
    ArmedTimer, SchedulerCommand, SchedulerError, SchedulerHandle, SharedSchedulerState,
};
use super::trigger::{local_to_utc, utc_to_local_naive, TriggerSpec};
use crate::delivery::ReportDelivery;
use crate::job_store::{JobStatus, MailJobStore, RunStatus};
use crate::report::{render, CollectorRegistry};
use crate::server::metrics;
use chrono::{DateTime, Local, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fallback poll interval when no timer is armed.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Heap index entry. Ordered by fire instant; the generation ties it to the
/// armed-timer entry it was created for, so replaced and cancelled timers
/// leave only stale entries behind that are skipped lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    fire_at: DateTime<Utc>,
    generation: u64,
    job_id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fire_at, self.generation, &self.job_id).cmp(&(
            other.fire_at,
            other.generation,
            &other.job_id,
        ))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Message sent back to the coordinator when a firing finishes.
#[derive(Debug)]
struct FiringOutcome {
    job_id: String,
    /// The instant the firing was armed for (not when it finished); the
    /// next occurrence is computed from this so recurrences do not drift.
    fired_at: DateTime<Utc>,
    succeeded: bool,
    error: Option<String>,
}

/// The scheduler engine: a single coordinator task owning a priority queue
/// of (fire instant, job id) over the authoritative armed-timer map.
///
/// Firings run on the blocking pool and report back through a channel; a
/// job is only re-armed after its firing's status update has been
/// persisted, so a single job's firings are strictly sequential while
/// different jobs never delay each other.
pub struct SchedulerEngine {
    store: Arc<dyn MailJobStore>,
    collectors: Arc<CollectorRegistry>,
    delivery: Arc<dyn ReportDelivery>,
    shared: Arc<RwLock<SharedSchedulerState>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    completion_tx: mpsc::Sender<FiringOutcome>,
    completion_rx: mpsc::Receiver<FiringOutcome>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    shutdown: CancellationToken,
}

impl SchedulerEngine {
    /// Main coordinator loop.
    pub async fn run(&mut self) {
        info!("Starting mail job scheduler");

        // Firings left in "running" state by a previous process are dead
        match self.store.mark_stale_runs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale firings as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale firings: {}", e);
            }
        }

        loop {
            let sleep_duration = self.time_until_next_fire().await;
            debug!("Scheduler sleeping for {:?} until next firing", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.fire_due_jobs().await;
                }
                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(outcome) = self.completion_rx.recv() => {
                    self.handle_firing_complete(outcome).await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Mail job scheduler stopped");
    }

    /// Time until the earliest live timer fires, discarding stale heap
    /// entries on the way.
    async fn time_until_next_fire(&mut self) -> Duration {
        let shared = self.shared.read().await;
        loop {
            let (live, fire_at) = match self.heap.peek() {
                Some(Reverse(entry)) => (
                    shared
                        .armed
                        .get(&entry.job_id)
                        .map(|t| t.generation == entry.generation)
                        .unwrap_or(false),
                    entry.fire_at,
                ),
                None => return IDLE_POLL_INTERVAL,
            };
            if !live {
                self.heap.pop();
                continue;
            }
            let now = Utc::now();
            if fire_at <= now {
                return Duration::ZERO;
            }
            let until = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
            return until.min(IDLE_POLL_INTERVAL);
        }
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Arm { job_id, response } => {
                let result = self.arm_job(&job_id).await;
                let _ = response.send(result);
            }
            SchedulerCommand::Cancel { job_id, response } => {
                let result = self.cancel_job(&job_id).await;
                let _ = response.send(result);
            }
            SchedulerCommand::Initialize { response } => {
                let result = self.initialize().await;
                let _ = response.send(result);
            }
        }
    }

    /// Arm the timer for a job at its next fire instant. Re-arming a job
    /// with an existing timer replaces it.
    async fn arm_job(&mut self, job_id: &str) -> Result<DateTime<Utc>, SchedulerError> {
        let job = self
            .store
            .get(job_id)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;

        if job.status != JobStatus::Scheduled {
            return Err(SchedulerError::NotSchedulable);
        }

        let spec = TriggerSpec::for_job(&job)?;
        let now_local = Local::now().naive_local();
        // An armed one-shot past its instant (e.g. re-armed after downtime)
        // fires immediately rather than being dropped
        let fire_at = match spec.first_fire_after(now_local) {
            Some(naive) => local_to_utc(naive),
            None => Utc::now(),
        };

        // Persist the armed fire time before the timer goes live
        self.store
            .update_status(&job.id, JobStatus::Scheduled, Some(fire_at))
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;

        let generation = {
            let mut shared = self.shared.write().await;
            let generation = shared.bump_generation();
            shared
                .armed
                .insert(job_id.to_string(), ArmedTimer { fire_at, generation });
            generation
        };
        self.heap.push(Reverse(HeapEntry {
            fire_at,
            generation,
            job_id: job_id.to_string(),
        }));
        self.update_armed_gauge().await;

        info!("Armed job {} for {}", job_id, fire_at);
        Ok(fire_at)
    }

    /// Clear any pending timer; a no-op for jobs with no timer. A cancel
    /// racing an in-flight firing lets the firing complete and suppresses
    /// its re-arm.
    async fn cancel_job(&mut self, job_id: &str) -> bool {
        let (had_timer, in_flight) = {
            let mut shared = self.shared.write().await;
            let had_timer = shared.armed.remove(job_id).is_some();
            let in_flight = shared.in_flight.contains(job_id);
            if in_flight {
                shared.cancelled_in_flight.insert(job_id.to_string());
            }
            (had_timer, in_flight)
        };

        if had_timer {
            // Clear the persisted fire time so the job shows no active timer
            match self.store.get(job_id) {
                Ok(Some(job)) if job.status == JobStatus::Scheduled => {
                    if let Err(e) = self.store.update_status(job_id, JobStatus::Scheduled, None) {
                        error!("Failed to clear fire time for cancelled job {}: {}", job_id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Failed to load cancelled job {}: {}", job_id, e),
            }
            info!("Cancelled timer for job {}", job_id);
        }
        self.update_armed_gauge().await;

        had_timer || in_flight
    }

    /// Arm every job the store reports as scheduled. Since arming replaces
    /// any existing timer, calling this twice never duplicates timers.
    async fn initialize(&mut self) -> Result<usize, SchedulerError> {
        let jobs = self
            .store
            .list_by_status(JobStatus::Scheduled)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;

        let mut armed = 0;
        for job in &jobs {
            match self.arm_job(&job.id).await {
                Ok(_) => armed += 1,
                Err(e) => {
                    warn!("Failed to arm job {} during initialization: {}", job.id, e);
                }
            }
        }

        self.shared.write().await.is_initialized = true;
        info!("Scheduler initialized with {} armed jobs", armed);
        Ok(armed)
    }

    /// Pop and launch every due live timer.
    async fn fire_due_jobs(&mut self) {
        let now = Utc::now();
        loop {
            let is_due = self
                .heap
                .peek()
                .map(|Reverse(entry)| entry.fire_at <= now)
                .unwrap_or(false);
            if !is_due {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };

            {
                let mut shared = self.shared.write().await;
                let live = shared
                    .armed
                    .get(&entry.job_id)
                    .map(|t| t.generation == entry.generation)
                    .unwrap_or(false);
                if !live {
                    continue;
                }
                shared.armed.remove(&entry.job_id);
                shared.in_flight.insert(entry.job_id.clone());
            }
            self.update_armed_gauge().await;
            self.spawn_firing(entry.job_id, entry.fire_at);
        }
    }

    /// Launch a firing on the blocking pool. The collect/render/deliver
    /// pipeline runs there; its outcome flows back through the completion
    /// channel so the coordinator can persist the transition and re-arm.
    fn spawn_firing(&self, job_id: String, fired_at: DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        let collectors = Arc::clone(&self.collectors);
        let delivery = Arc::clone(&self.delivery);
        let completion_tx = self.completion_tx.clone();

        info!("Firing job {}", job_id);
        tokio::spawn(async move {
            let run_id = match store.record_run_start(&job_id, "schedule") {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Failed to record firing start for {}: {}", job_id, e);
                    None
                }
            };

            let blocking_store = Arc::clone(&store);
            let blocking_job_id = job_id.clone();
            let result = tokio::task::spawn_blocking(move || {
                run_firing(blocking_store, collectors, delivery, &blocking_job_id)
            })
            .await;

            let (succeeded, error) = match result {
                Ok(Ok(())) => (true, None),
                Ok(Err(message)) => (false, Some(message)),
                Err(e) => (false, Some(format!("firing task panicked: {}", e))),
            };

            if let Some(run_id) = run_id {
                let status = if succeeded {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                };
                if let Err(e) = store.record_run_finish(run_id, status, error.clone()) {
                    error!("Failed to record firing finish for {}: {}", job_id, e);
                }
            }

            let _ = completion_tx
                .send(FiringOutcome {
                    job_id,
                    fired_at,
                    succeeded,
                    error,
                })
                .await;
        });
    }

    /// Apply the state-machine transition for a finished firing and re-arm
    /// recurring jobs. Runs on the coordinator, strictly after the run
    /// record has been persisted.
    async fn handle_firing_complete(&mut self, outcome: FiringOutcome) {
        let (was_cancelled, manually_rearmed) = {
            let mut shared = self.shared.write().await;
            shared.in_flight.remove(&outcome.job_id);
            let was_cancelled = shared.cancelled_in_flight.remove(&outcome.job_id);
            (was_cancelled, shared.armed.contains_key(&outcome.job_id))
        };

        let job = match self.store.get(&outcome.job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("Job {} was deleted during its firing", outcome.job_id);
                return;
            }
            Err(e) => {
                error!("Failed to load job {} after firing: {}", outcome.job_id, e);
                return;
            }
        };
        if job.status != JobStatus::Scheduled {
            return;
        }

        metrics::record_report_firing(
            &job.report_type_id,
            if outcome.succeeded { "completed" } else { "failed" },
        );

        if !job.is_recurring {
            let status = if outcome.succeeded {
                info!("Job {} completed", job.id);
                JobStatus::Completed
            } else {
                warn!(
                    "Job {} failed: {}",
                    job.id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                JobStatus::Failed
            };
            if let Err(e) = self.store.update_status(&job.id, status, None) {
                error!("Failed to persist status for job {}: {}", job.id, e);
            }
            return;
        }

        // Recurring: a failed firing is logged but never stops future
        // occurrences
        if !outcome.succeeded {
            warn!(
                "Recurring job {} firing failed (will fire again): {}",
                job.id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        if was_cancelled {
            info!("Job {} was cancelled during its firing; not re-arming", job.id);
            if let Err(e) = self.store.update_status(&job.id, JobStatus::Scheduled, None) {
                error!("Failed to clear fire time for job {}: {}", job.id, e);
            }
            return;
        }
        if manually_rearmed {
            // An arm command won the race; its timer stands
            return;
        }

        let spec = match TriggerSpec::for_job(&job) {
            Ok(spec) => spec,
            Err(e) => {
                error!("Job {} has an invalid stored schedule: {}", job.id, e);
                let _ = self.store.update_status(&job.id, JobStatus::Failed, None);
                return;
            }
        };

        match spec.next_occurrence_after(utc_to_local_naive(outcome.fired_at)) {
            Some(next_local) => {
                let fire_at = local_to_utc(next_local);
                // Persist before the timer goes live: never re-arm ahead of
                // the status write
                if let Err(e) =
                    self.store
                        .update_status(&job.id, JobStatus::Scheduled, Some(fire_at))
                {
                    error!("Failed to persist next fire time for job {}: {}", job.id, e);
                    return;
                }
                let generation = {
                    let mut shared = self.shared.write().await;
                    let generation = shared.bump_generation();
                    shared
                        .armed
                        .insert(job.id.clone(), ArmedTimer { fire_at, generation });
                    generation
                };
                self.heap.push(Reverse(HeapEntry {
                    fire_at,
                    generation,
                    job_id: job.id.clone(),
                }));
                self.update_armed_gauge().await;
                info!("Job {} re-armed for {}", job.id, fire_at);
            }
            None => {
                // The pattern yields no further occurrence; the job is done
                info!(
                    "Job {} has no further occurrences; marking completed",
                    job.id
                );
                if let Err(e) = self.store.update_status(&job.id, JobStatus::Completed, None) {
                    error!("Failed to persist status for job {}: {}", job.id, e);
                }
            }
        }
    }

    async fn update_armed_gauge(&self) {
        let armed = self.shared.read().await.armed.len();
        metrics::set_armed_jobs(armed);
    }
}

/// The collect -> render -> deliver pipeline for one firing. Runs on the
/// blocking pool. Delivery failure is a logged side effect, not a firing
/// failure.
fn run_firing(
    store: Arc<dyn MailJobStore>,
    collectors: Arc<CollectorRegistry>,
    delivery: Arc<dyn ReportDelivery>,
    job_id: &str,
) -> Result<(), String> {
    let job = store
        .get(job_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("job {} no longer exists", job_id))?;

    let collector = collectors.get(&job.report_type_id).ok_or_else(|| {
        format!(
            "no collector registered for report type '{}'",
            job.report_type_id
        )
    })?;

    let report = collector
        .collect(&job.report_parameters)
        .map_err(|e| e.to_string())?;
    let artifact = render::render(&report, job.report_format).map_err(|e| e.to_string())?;

    if let Err(e) = delivery.send(
        &job.email_recipient,
        &artifact,
        job.report_format,
        &job.report_name,
    ) {
        warn!(
            "Delivery to {} failed for job {}: {}",
            job.email_recipient, job_id, e
        );
    }

    Ok(())
}

/// Create a scheduler engine and the handle for interacting with it.
pub fn create_scheduler(
    store: Arc<dyn MailJobStore>,
    collectors: Arc<CollectorRegistry>,
    delivery: Arc<dyn ReportDelivery>,
    shutdown: CancellationToken,
) -> (SchedulerEngine, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let (completion_tx, completion_rx) = mpsc::channel(100);
    let shared = Arc::new(RwLock::new(SharedSchedulerState::new()));

    let engine = SchedulerEngine {
        store: Arc::clone(&store),
        collectors,
        delivery,
        shared: Arc::clone(&shared),
        command_rx,
        completion_tx,
        completion_rx,
        heap: BinaryHeap::new(),
        shutdown,
    };

    let handle = SchedulerHandle::new(command_tx, shared, store);

    (engine, handle)
}
