//! Intake/dispatch HTTP surface (§6): upload a file (or batch, or a server-side
//! path) into an `IngestJob`, dispatch it onto its `worker_route`, and expose
//! job/batch/queue status for polling clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::{
    error::AppError,
    storage::types::ingest_job::{IngestJob, JobPriority, JobStatus},
};
use ingestion_pipeline::{
    dispatcher,
    intake::{self, HeuristicImageQualityAnalyzer},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

fn parse_priority(raw: Option<&str>) -> Result<JobPriority, ApiError> {
    match raw.unwrap_or("user") {
        "user" => Ok(JobPriority::User),
        "batch" => Ok(JobPriority::Batch),
        "reprocess" => Ok(JobPriority::Reprocess),
        other => Err(ApiError::ValidationError(format!("unknown priority '{other}'"))),
    }
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub filename: String,
    pub category: String,
    pub status: String,
    pub route: Vec<String>,
    pub quality: Option<serde_json::Value>,
}

impl From<IngestJob> for JobSummary {
    fn from(job: IngestJob) -> Self {
        Self {
            job_id: job.id,
            filename: job.original_name,
            category: format!("{:?}", job.category).to_lowercase(),
            status: format!("{:?}", job.status).to_lowercase(),
            route: job.worker_route,
            quality: job.quality_score.map(|score| json!(score)),
        }
    }
}

async fn dispatch_and_summarize(state: &ApiState, job: IngestJob) -> Result<JobSummary, ApiError> {
    dispatcher::dispatch(&state.db, &state.job_queue, &job).await?;
    let refreshed = IngestJob::get(&state.db, &job.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingest job {}", job.id)))?;
    Ok(refreshed.into())
}

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    pub file: FieldData<NamedTempFile>,
    #[form_data(default)]
    pub priority: Option<String>,
}

pub async fn upload(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let priority = parse_priority(input.priority.as_deref())?;
    let file_name = input
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "upload".to_string());
    let bytes = tokio::fs::read(input.file.contents.path())
        .await
        .map_err(AppError::Io)?;

    let analyzer = HeuristicImageQualityAnalyzer;
    let job = intake::receive_file(
        &state.db,
        &state.storage,
        &analyzer,
        state.config.ocr_mode,
        &file_name,
        &bytes,
        priority,
        None,
    )
    .await?;

    info!(job_id = %job.id, "ingest job received via upload");
    let summary = dispatch_and_summarize(&state, job).await?;
    Ok((StatusCode::OK, Json(summary)))
}

#[derive(Debug, TryFromMultipart)]
pub struct UploadBatchParams {
    #[form_data(default)]
    pub files: Vec<FieldData<NamedTempFile>>,
    #[form_data(default)]
    pub priority: Option<String>,
}

pub async fn upload_batch(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadBatchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let priority = parse_priority(input.priority.as_deref())?;

    let mut files = Vec::with_capacity(input.files.len());
    for file in input.files {
        let file_name = file.metadata.file_name.clone().unwrap_or_else(|| "upload".to_string());
        let bytes = tokio::fs::read(file.contents.path()).await.map_err(AppError::Io)?;
        files.push((file_name, bytes));
    }

    let analyzer = HeuristicImageQualityAnalyzer;
    let jobs = intake::receive_batch(&state.db, &state.storage, &analyzer, state.config.ocr_mode, files, priority).await?;

    let mut summaries = Vec::with_capacity(jobs.len());
    for job in jobs {
        summaries.push(dispatch_and_summarize(&state, job).await?);
    }

    Ok((StatusCode::OK, Json(json!({ "jobs": summaries }))))
}

#[derive(Debug, Deserialize)]
pub struct IngestPathRequest {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub priority: Option<String>,
}

pub async fn ingest_path(
    State(state): State<ApiState>,
    Json(input): Json<IngestPathRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let priority = parse_priority(input.priority.as_deref())?;
    let analyzer = HeuristicImageQualityAnalyzer;
    let jobs = intake::receive_path(
        &state.db,
        &state.storage,
        &analyzer,
        state.config.ocr_mode,
        &PathBuf::from(input.path),
        input.recursive,
        priority,
    )
    .await?;

    let mut summaries = Vec::with_capacity(jobs.len());
    for job in jobs {
        summaries.push(dispatch_and_summarize(&state, job).await?);
    }

    Ok((StatusCode::OK, Json(json!({ "jobs": summaries }))))
}

pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job = IngestJob::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingest job {id}")))?;
    Ok(Json(JobSummary::from(job)))
}

pub async fn get_batch(State(state): State<ApiState>, Path(batch_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let jobs = IngestJob::find_by_batch(&state.db, &batch_id).await?;
    if jobs.is_empty() {
        return Err(ApiError::NotFound(format!("batch {batch_id}")));
    }

    let complete = jobs
        .iter()
        .all(|job| matches!(job.status, JobStatus::Completed | JobStatus::Failed | JobStatus::Dead));

    let summaries: Vec<JobSummary> = jobs.into_iter().map(JobSummary::from).collect();
    Ok(Json(json!({ "batch_id": batch_id, "complete": complete, "jobs": summaries })))
}

/// Re-dispatches a `Failed`/`Dead` job from the start of its route, resetting
/// `retry_count`. Unlike the automatic retry path in `dispatcher::on_worker_failed`
/// (which only fires while `can_retry()` still holds), this is an explicit
/// operator override and ignores the retry budget.
pub async fn retry_job(State(state): State<ApiState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job = IngestJob::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingest job {id}")))?;

    if !matches!(job.status, JobStatus::Failed | JobStatus::Dead) {
        return Err(ApiError::ValidationError(format!(
            "job {id} is not in a retryable state ({:?})",
            job.status
        )));
    }

    IngestJob::update_dispatch_state(
        &state.db,
        &job.id,
        JobStatus::Pending,
        job.worker_route.clone(),
        0,
        None,
        0,
        job.document_id.clone(),
        None,
    )
    .await?;

    let reset = IngestJob::get(&state.db, &job.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingest job {id}")))?;
    let summary = dispatch_and_summarize(&state, reset).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub pool: Option<String>,
}

/// Lists jobs currently queued or processing, optionally narrowed to one pool
/// (§6 `GET /api/ingest/queue`).
pub async fn get_queue(
    State(state): State<ApiState>,
    axum::extract::Query(query): axum::extract::Query<QueueQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = IngestJob::find_active(&state.db, query.pool.as_deref()).await?;
    let summaries: Vec<JobSummary> = jobs.into_iter().map(JobSummary::from).collect();
    Ok(Json(json!({ "jobs": summaries })))
}
