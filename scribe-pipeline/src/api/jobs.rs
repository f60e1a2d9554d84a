//! Job API handlers
//!
//! - POST /jobs?filename=..&num_speakers=N  (raw audio body) → 202
//! - GET  /jobs                             → all job statuses
//! - GET  /jobs/:job_id                     → Status Endpoint
//! - GET  /jobs/:job_id/results             → results once processed
//! - POST /jobs/:job_id/cancel              → best-effort cancellation
//! - GET  /jobs/events                      → SSE stream

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use scribe_common::api::{CancelResponse, JobResults, JobStatusResponse, UploadResponse};
use scribe_common::{JobId, JobStatus};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::models::AudioUpload;
use crate::store::JobStore;
use crate::AppState;

/// POST /jobs query parameters
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub num_speakers: Option<u32>,
}

/// POST /jobs
///
/// Accepts the audio and starts the pipeline. Returns 202 as soon as the
/// job record exists; the upload stage itself runs on the job task.
pub async fn upload_job(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Request body is empty".to_string()));
    }
    if params.num_speakers == Some(0) {
        return Err(ApiError::BadRequest(
            "num_speakers must be at least 1".to_string(),
        ));
    }

    let filename = params
        .filename
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| "audio".to_string());

    let upload = AudioUpload::new(filename, params.num_speakers, body.to_vec());
    let handle = match state.runner.submit(upload).await {
        Ok(handle) => handle,
        Err(e) => {
            state.record_error(e.to_string()).await;
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id: handle.job_id().clone(),
            status: JobStatus::Uploading,
        }),
    ))
}

/// GET /jobs/:job_id
///
/// Side-effect free snapshot of the job record.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.store.get(&JobId::from(job_id)).await?;

    tracing::debug!(job_id = %job.id, status = %job.status, progress = job.progress, "Status query");

    Ok(Json(job.to_status_response()))
}

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobStatusResponse>>> {
    let jobs = state.store.list().await?;
    Ok(Json(jobs.iter().map(|j| j.to_status_response()).collect()))
}

/// GET /jobs/:job_id/results
///
/// 409 until the job is processed (a failed job never has results).
pub async fn get_job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResults>> {
    let job = state.store.get(&JobId::from(job_id)).await?;

    if job.status != JobStatus::Processed {
        return Err(ApiError::Conflict(format!(
            "Job {} is {}, results not available",
            job.id, job.status
        )));
    }

    let result_ref = job.result_ref.ok_or_else(|| {
        ApiError::Internal(format!("Processed job {} has no result reference", job.id))
    })?;

    Ok(Json(state.store.load_results(&result_ref).await?))
}

/// POST /jobs/:job_id/cancel
///
/// The job stops at its next stage boundary; no state change is
/// guaranteed by the time this returns.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let job = state.store.get(&JobId::from(job_id)).await?;
    let cancel_requested = state.runner.cancel(&job.id).await;

    tracing::info!(
        job_id = %job.id,
        status = %job.status,
        cancel_requested,
        "Cancel request received"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id: job.id,
            cancel_requested,
        }),
    ))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(upload_job).get(list_jobs))
        .route("/jobs/events", get(super::job_event_stream))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/jobs/:job_id/results", get(get_job_results))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}
