//! Conversion job API handlers.

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use transmute_core::{ConversionJob, FailureKind, JobFilter, JobStatus};

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing conversions
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status
    pub status: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Request body for converting a job
#[derive(Debug, Deserialize)]
pub struct ConvertBody {
    pub target_format: String,
}

/// A conversion job as returned to clients.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub original_filename: String,
    pub source_format: String,
    pub target_format: Option<String>,
    pub file_size_bytes: u64,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    /// Set once the job is completed.
    pub download_url: Option<String>,
}

impl From<ConversionJob> for JobResponse {
    fn from(job: ConversionJob) -> Self {
        let download_url = (job.status() == JobStatus::Completed)
            .then(|| format!("/api/v1/conversions/{}/download", job.id));
        Self {
            status: job.status(),
            error_message: job.error_message().map(str::to_string),
            failure_kind: job.state.failure_kind(),
            completed_at: job.completed_at().map(|t| t.to_rfc3339()),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            download_url,
            id: job.id,
            original_filename: job.original_filename,
            source_format: job.source_format,
            target_format: job.target_format,
            file_size_bytes: job.file_size_bytes,
        }
    }
}

/// Response for listing conversions
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub conversions: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for deleting a conversion
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// List conversions, newest first
pub async fn list_conversions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new();
    if let Some(status) = params.status.as_deref() {
        let status: JobStatus = status.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }

    let total = state.service().count_jobs(&filter)?;
    let jobs = state
        .service()
        .list_jobs(&filter.with_limit(limit).with_offset(offset))?;

    Ok(Json(ListJobsResponse {
        conversions: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a conversion by ID
pub async fn get_conversion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.service().get_job(&id)?;
    Ok(Json(job.into()))
}

/// Delete a conversion and its files
pub async fn delete_conversion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let job = state.service().delete_job(&id).await?;
    Ok(Json(DeleteResponse {
        id: job.id,
        deleted: true,
    }))
}

/// Convert a job and wait for the result
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ConvertBody>,
) -> Result<Json<JobResponse>, ApiError> {
    if body.target_format.trim().is_empty() {
        return Err(ApiError::bad_request("target_format is required"));
    }
    let job = state
        .service()
        .request_conversion(&id, &body.target_format)
        .await?;
    Ok(Json(job.into()))
}

/// Run a named operation on a job and wait for the result
pub async fn run_operation(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.service().request_operation(&id, &name).await?;
    Ok(Json(job.into()))
}

/// Download the output of a completed conversion
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let file = state.service().download(&id).await?;
    Ok(serve_attachment(&file.path, &file.filename, request).await)
}

// ============================================================================
// Helpers
// ============================================================================

/// Streams a file from disk as an attachment named `filename`.
///
/// `request` must be a GET (range headers are honored).
pub(crate) async fn serve_attachment(
    path: &std::path::Path,
    filename: &str,
    request: Request,
) -> Response {
    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, content_disposition(filename));
    }
    response
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
pub(crate) fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
