use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

use crate::{
    error::{Error, Result},
    job::{LaunchReceipt, Launcher},
    outline::{Outline, OutlineModule},
    producer::Question,
    progress::{ContentItem, JobPhase, JobState, ProgressStore, QuestionStatus},
    store::{ContentRow, CourseStore, ProgressRow},
};

#[derive(Clone)]
pub struct AppState {
    pub launcher: Arc<Launcher>,
    pub progress: Arc<ProgressStore>,
    pub store: Arc<dyn CourseStore>,
}

impl AppState {
    pub fn new(launcher: Arc<Launcher>) -> Self {
        let progress = launcher.progress().clone();
        let store = progress.durable().clone();
        Self {
            launcher,
            progress,
            store,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::JobNotFound(_) => StatusCode::NOT_FOUND,
            Error::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("request failed: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn default_course_name() -> String {
    "General Course".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LaunchRequest {
    pub course_id: Option<i64>,
    #[serde(default = "default_course_name")]
    pub course_name: String,
    pub course_data: Option<Outline>,
}

#[utoipa::path(
    post,
    path = "/api/content-generate/detailed-content",
    request_body = LaunchRequest,
    responses(
        (status = 200, description = "Job registered and started", body = LaunchReceipt),
        (status = 400, description = "Missing course id or malformed outline", body = ErrorBody),
        (status = 503, description = "Concurrency ceiling reached", body = ErrorBody)
    )
)]
pub async fn launch_job(
    State(state): State<AppState>,
    request: Result<Json<LaunchRequest>, JsonRejection>,
) -> Result<Json<LaunchReceipt>> {
    let Json(request) = request.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let course_id = request
        .course_id
        .ok_or_else(|| Error::InvalidInput("course_id is required".to_string()))?;
    let outline = request
        .course_data
        .ok_or_else(|| Error::InvalidInput("Invalid course data format".to_string()))?;
    state
        .launcher
        .start(course_id, &request.course_name, outline)
        .map(Json)
}

/// Live view of a job from the in-memory registry.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusView {
    pub job_id: String,
    pub course_id: i64,
    pub status: JobPhase,
    pub progress_percent: u8,
    pub total_items: Option<usize>,
    pub completed_items: usize,
    pub question_status: Option<QuestionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// generated items, once the content phase is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ContentItem>>,
}

impl From<JobState> for JobStatusView {
    fn from(state: JobState) -> Self {
        let progress_percent = state.progress_percent();
        let data = (state.phase == JobPhase::Completed).then_some(state.items);
        Self {
            job_id: state.job_id,
            course_id: state.course_id,
            status: state.phase,
            progress_percent,
            total_items: state.total_items,
            completed_items: state.completed_items,
            question_status: state.question_status,
            error: state.error,
            data,
        }
    }
}

fn find_job(progress: &ProgressStore, job_id: &str) -> Result<JobState> {
    progress
        .get(job_id)
        .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
}

#[utoipa::path(
    get,
    path = "/api/content-generate/detailed-content/status/{job_id}",
    params(("job_id" = String, Path, description = "Id returned by the launch call")),
    responses(
        (status = 200, description = "Live job state", body = JobStatusView),
        (status = 404, description = "Unknown job or pruned", body = ErrorBody)
    )
)]
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>> {
    find_job(&state.progress, &job_id).map(|job| Json(job.into()))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobResult {
    Completed {
        data: Vec<ContentItem>,
        total_items: usize,
        completed_items: usize,
    },
    Error {
        error: String,
    },
    Processing {
        progress: u8,
        total_items: usize,
        completed_items: usize,
    },
}

impl From<JobState> for JobResult {
    fn from(state: JobState) -> Self {
        let total_items = state.total_items.unwrap_or_default();
        match state.phase {
            JobPhase::Completed => JobResult::Completed {
                data: state.items,
                total_items,
                completed_items: state.completed_items,
            },
            JobPhase::Error => JobResult::Error {
                error: state.error.unwrap_or_else(|| "Unknown error".to_string()),
            },
            JobPhase::Starting | JobPhase::Processing => JobResult::Processing {
                progress: state.progress_percent(),
                total_items,
                completed_items: state.completed_items,
            },
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/content-generate/detailed-content/result/{job_id}",
    params(("job_id" = String, Path, description = "Id returned by the launch call")),
    responses(
        (status = 200, description = "Completed items or progress counters", body = JobResult),
        (status = 404, description = "Unknown job or pruned", body = ErrorBody),
        (status = 500, description = "The job ended in error", body = JobResult)
    )
)]
pub async fn job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response> {
    let result = JobResult::from(find_job(&state.progress, &job_id)?);
    let status = match result {
        JobResult::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)).into_response())
}

/// Latest durable progress row of a course.
#[derive(Debug, Serialize, ToSchema)]
pub struct CourseProgress {
    pub course_id: i64,
    /// `no_progress_found` when the course never ran
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_status: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_date: Option<OffsetDateTime>,
}

impl CourseProgress {
    fn from_row(course_id: i64, row: Option<ProgressRow>) -> Self {
        match row {
            Some(row) => Self {
                course_id,
                status: row.status,
                job_id: Some(row.job_id),
                question_status: row.question_status,
                updated_date: Some(row.updated_date),
            },
            None => Self {
                course_id,
                status: "no_progress_found".to_string(),
                job_id: None,
                question_status: None,
                updated_date: None,
            },
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/content-generate/progress/{course_id}",
    params(("course_id" = i64, Path, description = "Course id")),
    responses((status = 200, description = "OK", body = CourseProgress), (status = 500, description = "Store unavailable", body = ErrorBody))
)]
pub async fn course_progress(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<CourseProgress>> {
    let row = state.store.latest_progress(course_id).await?;
    Ok(Json(CourseProgress::from_row(course_id, row)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseContent {
    pub course_id: i64,
    pub content_count: usize,
    pub data: Vec<ContentRow>,
}

#[utoipa::path(
    get,
    path = "/api/content-generate/content/{course_id}",
    params(("course_id" = i64, Path, description = "Course id")),
    responses((status = 200, description = "OK", body = CourseContent), (status = 500, description = "Store unavailable", body = ErrorBody))
)]
pub async fn course_content(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<CourseContent>> {
    let data = state.store.course_content(course_id).await?;
    Ok(Json(CourseContent {
        course_id,
        content_count: data.len(),
        data,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseQuestions {
    pub course_id: i64,
    pub question_count: usize,
    pub data: Vec<Question>,
}

#[utoipa::path(
    get,
    path = "/api/content-generate/questions/{course_id}",
    params(("course_id" = i64, Path, description = "Course id")),
    responses((status = 200, description = "OK", body = CourseQuestions), (status = 500, description = "Store unavailable", body = ErrorBody))
)]
pub async fn course_questions(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<CourseQuestions>> {
    let data = state.store.course_questions(course_id).await?;
    Ok(Json(CourseQuestions {
        course_id,
        question_count: data.len(),
        data,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatusEntry {
    pub status: String,
    pub job_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_date: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PendingCourse {
    pub course_id: i64,
    pub latest_status: String,
    pub latest_job_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub latest_updated_date: OffsetDateTime,
    pub all_statuses: Vec<StatusEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingApproval {
    pub message: String,
    pub total_courses: usize,
    pub data: Vec<PendingCourse>,
}

/// Group rows (newest first) by course, keeping the course order of first sight.
pub fn group_pending(rows: Vec<ProgressRow>) -> Vec<PendingCourse> {
    let mut courses: Vec<PendingCourse> = Vec::new();
    for row in rows {
        let entry = StatusEntry {
            status: row.status,
            job_id: row.job_id,
            updated_date: row.updated_date,
        };
        match courses.iter_mut().find(|c| c.course_id == row.course_id) {
            Some(course) => {
                if !course.all_statuses.contains(&entry) {
                    course.all_statuses.push(entry);
                }
            }
            None => courses.push(PendingCourse {
                course_id: row.course_id,
                latest_status: entry.status.clone(),
                latest_job_id: entry.job_id.clone(),
                latest_updated_date: entry.updated_date,
                all_statuses: vec![entry],
            }),
        }
    }
    courses
}

#[utoipa::path(
    get,
    path = "/api/content-generate/pending-approval",
    responses((status = 200, description = "OK", body = PendingApproval), (status = 500, description = "Store unavailable", body = ErrorBody))
)]
pub async fn pending_approval(State(state): State<AppState>) -> Result<Json<PendingApproval>> {
    let data = group_pending(state.store.pending_progress().await?);
    Ok(Json(PendingApproval {
        message: "Pending approval courses retrieved successfully".to_string(),
        total_courses: data.len(),
        data,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Health {
    pub status: String,
    pub running_jobs: usize,
    pub tracked_jobs: usize,
}

#[utoipa::path(
    get,
    path = "/api/content-generate/health",
    responses((status = 200, description = "OK", body = Health))
)]
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        running_jobs: state.launcher.running(),
        tracked_jobs: state.progress.len(),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        launch_job,
        job_status,
        job_result,
        course_progress,
        course_content,
        course_questions,
        pending_approval,
        health,
    ),
    components(schemas(OutlineModule, QuestionStatus, StatusEntry))
)]
pub struct ApiDoc;

pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: AppState) -> Router {
    let content = Router::new()
        .route("/detailed-content", post(launch_job))
        .route("/detailed-content/status/{job_id}", get(job_status))
        .route("/detailed-content/result/{job_id}", get(job_result))
        .route("/progress/{course_id}", get(course_progress))
        .route("/content/{course_id}", get(course_content))
        .route("/questions/{course_id}", get(course_questions))
        .route("/pending-approval", get(pending_approval))
        .route("/health", get(health));
    Router::new()
        .nest("/api/content-generate", content)
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
}
