//! Batch API handlers.
//!
//! Every endpoint takes up to [`MAX_BATCH_SIZE`] items and reports one result
//! per item in request order. A failing item never fails its siblings.

use axum::{
    body::Body,
    extract::{Multipart, Request, State},
    http::{HeaderName, HeaderValue},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use transmute_core::{
    BatchError, ConversionError, ConvertOutcome, StatusCounts, StatusRow, UploadOutcome,
    MAX_BATCH_SIZE,
};

use super::conversions::{serve_attachment, JobResponse};
use super::error::{status_for, ApiError};
use super::middleware::ClientIp;
use super::uploads::{discard_received, receive_field};
use crate::state::AppState;

/// Number of ids written into a zip bundle.
pub const INCLUDED_COUNT_HEADER: HeaderName = HeaderName::from_static("x-included-count");

/// Number of ids left out of a zip bundle.
pub const SKIPPED_COUNT_HEADER: HeaderName = HeaderName::from_static("x-skipped-count");

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body naming a set of jobs
#[derive(Debug, Deserialize)]
pub struct BatchIdsBody {
    pub ids: Vec<String>,
}

/// Request body for converting a set of jobs
#[derive(Debug, Deserialize)]
pub struct BatchConvertBody {
    pub ids: Vec<String>,
    pub target_format: String,
}

/// Per-item error, shaped like the top-level error body
#[derive(Debug, Serialize)]
pub struct ItemError {
    pub error: String,
    pub kind: transmute_core::ErrorKind,
    pub status: u16,
}

impl From<ConversionError> for ItemError {
    fn from(err: ConversionError) -> Self {
        let kind = err.kind();
        Self {
            error: err.to_string(),
            kind,
            status: status_for(kind).as_u16(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub original_filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl From<UploadOutcome> for UploadResult {
    fn from(outcome: UploadOutcome) -> Self {
        let (job, error) = split(outcome.result);
        Self {
            original_filename: outcome.original_filename,
            success: job.is_some(),
            job,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchUploadResponse {
    pub results: Vec<UploadResult>,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct ConvertResult {
    pub job_id: String,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl From<ConvertOutcome> for ConvertResult {
    fn from(outcome: ConvertOutcome) -> Self {
        let (job, error) = split(outcome.result);
        Self {
            job_id: outcome.job_id,
            queued: job.is_some(),
            job,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchConvertResponse {
    pub results: Vec<ConvertResult>,
    pub queued: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub job_id: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobResponse>,
}

impl From<StatusRow> for StatusResult {
    fn from(row: StatusRow) -> Self {
        Self {
            job_id: row.job_id,
            found: row.job.is_some(),
            job: row.job.map(JobResponse::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub jobs: Vec<StatusResult>,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

fn split(
    result: Result<transmute_core::ConversionJob, ConversionError>,
) -> (Option<JobResponse>, Option<ItemError>) {
    match result {
        Ok(job) => (Some(job.into()), None),
        Err(e) => (None, Some(e.into())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Upload several files (multipart fields `files`) and create a job for each
pub async fn upload(
    State(state): State<Arc<AppState>>,
    client: ClientIp,
    mut multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, ApiError> {
    let mut files = Vec::new();
    let mut overflow = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard_received(&files).await;
                return Err(ApiError::multipart(e));
            }
        };
        if !matches!(field.name(), Some("files") | Some("file")) {
            continue;
        }
        if files.len() >= MAX_BATCH_SIZE {
            overflow += 1;
            continue;
        }
        match receive_field(state.service(), field).await {
            Ok(received) => files.push(received),
            Err(e) => {
                discard_received(&files).await;
                return Err(e);
            }
        }
    }

    if overflow > 0 {
        discard_received(&files).await;
        return Err(BatchError::BatchTooLarge {
            max: MAX_BATCH_SIZE,
            got: files.len() + overflow,
        }
        .into());
    }

    let outcomes = state.batch().upload(files, client.originator()).await?;
    let results: Vec<UploadResult> = outcomes.into_iter().map(UploadResult::from).collect();
    let accepted = results.iter().filter(|r| r.success).count();

    Ok(Json(BatchUploadResponse {
        rejected: results.len() - accepted,
        accepted,
        results,
    }))
}

/// Queue a conversion of every id; returns without waiting for the plugins
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchConvertBody>,
) -> Result<Json<BatchConvertResponse>, ApiError> {
    if body.target_format.trim().is_empty() {
        return Err(ApiError::bad_request("target_format is required"));
    }
    let outcomes = state.batch().convert(&body.ids, &body.target_format).await?;
    let results: Vec<ConvertResult> = outcomes.into_iter().map(ConvertResult::from).collect();
    let queued = results.iter().filter(|r| r.queued).count();

    Ok(Json(BatchConvertResponse {
        failed: results.len() - queued,
        queued,
        results,
    }))
}

/// Per-id status plus aggregate counts
pub async fn status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchIdsBody>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let status = state.batch().status(&body.ids)?;
    Ok(Json(BatchStatusResponse {
        jobs: status.rows.into_iter().map(StatusResult::from).collect(),
        counts: status.counts,
    }))
}

/// Bundle the completed outputs into a zip archive and stream it
pub async fn download_zip(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchIdsBody>,
) -> Result<Response, ApiError> {
    let archive = state.batch().bundle_zip(&body.ids).await?;

    let mut response =
        serve_attachment(&archive.path, &archive.filename, Request::new(Body::empty())).await;
    let headers = response.headers_mut();
    headers.insert(INCLUDED_COUNT_HEADER, HeaderValue::from(archive.included.len()));
    headers.insert(SKIPPED_COUNT_HEADER, HeaderValue::from(archive.skipped.len()));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_item_error_carries_status() {
        let err: ItemError = ConversionError::NotFound {
            job_id: "missing".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::NOT_FOUND.as_u16());
        assert_eq!(err.kind, transmute_core::ErrorKind::NotFound);
    }

    #[test]
    fn test_status_response_flattens_counts() {
        let response = BatchStatusResponse {
            jobs: vec![StatusResult {
                job_id: "a".to_string(),
                found: false,
                job: None,
            }],
            counts: StatusCounts {
                total: 1,
                not_found: 1,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["not_found"], 1);
        assert_eq!(json["all_complete"], false);
        assert_eq!(json["jobs"][0]["found"], false);
        assert!(json["jobs"][0].get("job").is_none());
    }
}
