use anyhow::Result;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{log_requests, metrics, state::*, ServerConfig};
use crate::job_store::{RecurrencePattern, ScheduledMailJob};
use crate::report::render::parse_format;
use crate::scheduler::{SchedulerError, SchedulerHandle, TriggerSpec};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub active_jobs: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct CreateMailJobBody {
    pub report_type_id: String,
    pub report_name: String,
    pub email_recipient: String,
    /// YYYY-MM-DD, server-local
    pub schedule_date: String,
    /// HH:MM or HH:MM:SS, server-local
    pub schedule_time: String,
    pub report_format: String,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
    #[serde(default)]
    pub report_parameters: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerStatusResponse {
    is_initialized: bool,
    active_jobs: usize,
    status: &'static str,
}

#[derive(Deserialize)]
struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    limit: usize,
}

fn default_runs_limit() -> usize {
    50
}

/// Validate a creation request and build the job record. Returns a
/// user-correctable message on rejection.
fn validate_create_body(body: &CreateMailJobBody) -> Result<ScheduledMailJob, String> {
    if body.report_type_id.trim().is_empty() {
        return Err("report_type_id must not be empty".to_string());
    }
    if body.report_name.trim().is_empty() {
        return Err("report_name must not be empty".to_string());
    }
    if !body.email_recipient.contains('@') {
        return Err(format!(
            "invalid email recipient: {}",
            body.email_recipient
        ));
    }

    let schedule_date = NaiveDate::parse_from_str(&body.schedule_date, "%Y-%m-%d")
        .map_err(|_| format!("invalid schedule: unparsable date '{}'", body.schedule_date))?;
    let schedule_time = NaiveTime::parse_from_str(&body.schedule_time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&body.schedule_time, "%H:%M"))
        .map_err(|_| format!("invalid schedule: unparsable time '{}'", body.schedule_time))?;

    let report_format = parse_format(&body.report_format).map_err(|e| e.to_string())?;

    let recurrence_pattern = match &body.recurrence_pattern {
        None => None,
        Some(s) => Some(
            RecurrencePattern::parse(s)
                .ok_or_else(|| format!("unknown recurrence pattern: {}", s))?,
        ),
    };

    let spec = TriggerSpec::build(
        schedule_date,
        schedule_time,
        body.is_recurring,
        recurrence_pattern,
    )
    .map_err(|e| e.to_string())?;
    spec.ensure_future(Local::now().naive_local())
        .map_err(|e| e.to_string())?;

    Ok(ScheduledMailJob::create(
        body.report_type_id.clone(),
        body.report_name.clone(),
        body.email_recipient.clone(),
        schedule_date,
        schedule_time,
        body.report_parameters
            .clone()
            .unwrap_or(serde_json::json!({})),
        report_format,
        recurrence_pattern,
    ))
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        active_jobs: state.scheduler.active_count().await,
    };
    Json(stats)
}

async fn list_jobs(State(scheduler): State<SchedulerHandle>) -> Response {
    match scheduler.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn create_job(
    State(store): State<GuardedMailJobStore>,
    State(scheduler): State<SchedulerHandle>,
    Json(body): Json<CreateMailJobBody>,
) -> Response {
    let job = match validate_create_body(&body) {
        Ok(job) => job,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    if let Err(err) = store.insert(&job) {
        error!("Failed to insert mail job: {}", err);
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response();
    }

    match scheduler.arm(&job.id).await {
        Ok(fire_at) => {
            info!("Created mail job {} ({}), first fire {}", job.id, job.report_name, fire_at);
        }
        Err(err) => {
            error!("Failed to arm new mail job {}: {}", job.id, err);
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response();
        }
    }

    match scheduler.get_job(&job.id).await {
        Ok(Some(info)) => (StatusCode::CREATED, Json(info)).into_response(),
        Ok(None) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn get_job(
    State(scheduler): State<SchedulerHandle>,
    Path(id): Path<String>,
) -> Response {
    match scheduler.get_job(&id).await {
        Ok(Some(info)) => Json(info).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn delete_job(
    State(store): State<GuardedMailJobStore>,
    State(scheduler): State<SchedulerHandle>,
    Path(id): Path<String>,
) -> Response {
    // Clear any pending timer first; cancel on a job with no timer is a no-op
    if let Err(err) = scheduler.cancel(&id).await {
        error!("Failed to cancel timer for job {}: {}", id, err);
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response();
    }

    match store.delete(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn get_job_runs(
    State(scheduler): State<SchedulerHandle>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Response {
    match scheduler.get_job_runs(&id, query.limit) {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn scheduler_init(State(scheduler): State<SchedulerHandle>) -> Response {
    match scheduler.initialize().await {
        Ok(active_jobs) => Json(SchedulerStatusResponse {
            is_initialized: true,
            active_jobs,
            status: "running",
        })
        .into_response(),
        Err(err @ SchedulerError::Unavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, format!("{}", err)).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn scheduler_status(State(scheduler): State<SchedulerHandle>) -> impl IntoResponse {
    let is_initialized = scheduler.is_initialized().await;
    Json(SchedulerStatusResponse {
        is_initialized,
        active_jobs: scheduler.active_count().await,
        status: if is_initialized { "running" } else { "idle" },
    })
}

pub fn make_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/scheduled-mail", get(list_jobs).post(create_job))
        .route("/scheduled-mail/{id}", get(get_job).delete(delete_job))
        .route("/scheduled-mail/{id}/runs", get(get_job_runs))
        .route("/scheduler/init", get(scheduler_status).post(scheduler_init))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub async fn run_server(
    job_store: GuardedMailJobStore,
    scheduler: SchedulerHandle,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let state = ServerState {
        config,
        start_time: Instant::now(),
        job_store,
        scheduler,
    };

    let app = make_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::ReportFormat;
    use chrono::Duration as ChronoDuration;

    fn valid_body() -> CreateMailJobBody {
        let tomorrow = (Local::now() + ChronoDuration::days(1)).naive_local();
        CreateMailJobBody {
            report_type_id: "alarms".to_string(),
            report_name: "Alarm Summary".to_string(),
            email_recipient: "ops@example.com".to_string(),
            schedule_date: tomorrow.date().format("%Y-%m-%d").to_string(),
            schedule_time: "09:00".to_string(),
            report_format: "pdf".to_string(),
            is_recurring: false,
            recurrence_pattern: None,
            report_parameters: None,
        }
    }

    #[test]
    fn test_validate_accepts_valid_body() {
        let job = validate_create_body(&valid_body()).unwrap();
        assert_eq!(job.report_type_id, "alarms");
        assert_eq!(job.report_format, ReportFormat::Pdf);
        assert!(!job.is_recurring);
        assert_eq!(job.report_parameters, serde_json::json!({}));
    }

    #[test]
    fn test_validate_accepts_seconds_in_time() {
        let mut body = valid_body();
        body.schedule_time = "09:30:15".to_string();
        let job = validate_create_body(&body).unwrap();
        assert_eq!(
            job.schedule_time,
            NaiveTime::from_hms_opt(9, 30, 15).unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_bad_date() {
        let mut body = valid_body();
        body.schedule_date = "10.01.2024".to_string();
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("unparsable date"));
    }

    #[test]
    fn test_validate_rejects_bad_time() {
        let mut body = valid_body();
        body.schedule_time = "9 o'clock".to_string();
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("unparsable time"));
    }

    #[test]
    fn test_validate_rejects_unknown_format_naming_value() {
        let mut body = valid_body();
        body.report_format = "docx".to_string();
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("unsupported report format"));
        assert!(err.contains("docx"));
    }

    #[test]
    fn test_validate_rejects_pattern_mismatch() {
        let mut body = valid_body();
        body.is_recurring = true;
        // recurring without a pattern
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("recurrence pattern"));

        let mut body = valid_body();
        body.recurrence_pattern = Some("weekly".to_string());
        // pattern without recurring
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("non-recurring"));
    }

    #[test]
    fn test_validate_rejects_unknown_pattern() {
        let mut body = valid_body();
        body.is_recurring = true;
        body.recurrence_pattern = Some("fortnightly".to_string());
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("fortnightly"));
    }

    #[test]
    fn test_validate_rejects_past_one_shot() {
        let mut body = valid_body();
        body.schedule_date = "2020-01-01".to_string();
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("past"));
    }

    #[test]
    fn test_validate_accepts_past_recurring() {
        let mut body = valid_body();
        body.schedule_date = "2020-01-01".to_string();
        body.is_recurring = true;
        body.recurrence_pattern = Some("daily".to_string());
        let job = validate_create_body(&body).unwrap();
        assert!(job.is_recurring);
        assert_eq!(job.recurrence_pattern, Some(RecurrencePattern::Daily));
    }

    #[test]
    fn test_validate_rejects_bad_recipient() {
        let mut body = valid_body();
        body.email_recipient = "not-an-address".to_string();
        let err = validate_create_body(&body).unwrap_err();
        assert!(err.contains("recipient"));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(
            format_uptime(Duration::from_secs(90_061)),
            "1d 01:01:01"
        );
    }
}
