//! Import routes
//!
//! Upload a report, poll its status and progress, or cancel it. The upload is
//! the raw CSV as the request body; the response carries the job id as soon as
//! the job is registered, before any row is read.

use adrep_ingest::{ImportOrchestrator, JobId, FAILED_PREFIX, NOT_FOUND};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::AppError;

/// Filename used when the client does not send one
const DEFAULT_FILENAME: &str = "upload.csv";

#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    pub filename: Option<String>,
}

/// Create import routes
pub fn imports_routes(max_upload_bytes: usize) -> Router<ImportOrchestrator> {
    Router::new()
        .route("/", post(submit_import))
        .route("/:job_id/status", get(get_status))
        .route("/:job_id/progress", get(get_progress))
        .route("/:job_id", delete(cancel_import))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// Start an import
///
/// POST /imports?filename=report.csv
async fn submit_import(
    State(orchestrator): State<ImportOrchestrator>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Please select a CSV file to upload".to_string()));
    }

    let filename = params
        .filename
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    let job_id = orchestrator.submit(body.as_ref(), filename.as_str())?;
    info!(job_id, filename = %filename, bytes = body.len(), "Accepted report upload");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "filename": filename,
            "message": "Import started",
        })),
    )
        .into_response())
}

/// Get the status line of an import
///
/// GET /imports/:job_id/status
async fn get_status(
    State(orchestrator): State<ImportOrchestrator>,
    Path(job_id): Path<JobId>,
) -> Response {
    let status = orchestrator.status(job_id);
    let code = if status == NOT_FOUND {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };

    (code, Json(json!({ "job_id": job_id, "status": status }))).into_response()
}

/// Get the progress snapshot of an import
///
/// GET /imports/:job_id/progress
///
/// A failed job answers 500 so pollers stop.
async fn get_progress(
    State(orchestrator): State<ImportOrchestrator>,
    Path(job_id): Path<JobId>,
) -> Result<Response, AppError> {
    let progress = orchestrator
        .progress(job_id)
        .ok_or_else(|| AppError::NotFound(format!("Import job {} not found", job_id)))?;

    let status = orchestrator.status(job_id);
    if status.starts_with(FAILED_PREFIX) {
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": true,
                "message": status,
                "progress": progress,
            })),
        )
            .into_response());
    }

    Ok((StatusCode::OK, Json(progress)).into_response())
}

/// Request cancellation of a running import
///
/// DELETE /imports/:job_id
async fn cancel_import(
    State(orchestrator): State<ImportOrchestrator>,
    Path(job_id): Path<JobId>,
) -> Result<Response, AppError> {
    if !orchestrator.cancel(job_id) {
        return Err(AppError::NotFound(format!(
            "Import job {} not found or already finished",
            job_id
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "message": "Cancellation requested",
        })),
    )
        .into_response())
}
