use serde::Serialize;
use std::path::PathBuf;

use crate::job::{ConversionJob, JobStatus};
use crate::service::ConversionError;
use crate::storage::StoredUpload;

/// One file from a batch upload, after its bytes were written (or rejected).
#[derive(Debug)]
pub struct ReceivedFile {
    pub original_filename: String,
    pub upload: Result<StoredUpload, ConversionError>,
}

/// Per-file result of a batch upload.
#[derive(Debug)]
pub struct UploadOutcome {
    pub original_filename: String,
    pub result: Result<ConversionJob, ConversionError>,
}

/// Per-id result of a batch convert. `Ok` holds the job in `processing`.
#[derive(Debug)]
pub struct ConvertOutcome {
    pub job_id: String,
    pub result: Result<ConversionJob, ConversionError>,
}

/// Per-id row of a batch status check. `job` is `None` for unknown ids.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub job_id: String,
    pub job: Option<ConversionJob>,
}

/// Aggregate counts over a batch status check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub uploaded: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub not_found: usize,
    pub all_complete: bool,
}

impl StatusCounts {
    pub(crate) fn from_rows(rows: &[StatusRow]) -> Self {
        let mut counts = Self {
            total: rows.len(),
            ..Default::default()
        };
        for row in rows {
            match row.job.as_ref().map(ConversionJob::status) {
                Some(JobStatus::Uploaded) => counts.uploaded += 1,
                Some(JobStatus::Processing) => counts.processing += 1,
                Some(JobStatus::Completed) => counts.completed += 1,
                Some(JobStatus::Failed) => counts.failed += 1,
                None => counts.not_found += 1,
            }
        }
        counts.all_complete = counts.total > 0 && counts.completed == counts.total;
        counts
    }
}

/// Result of a batch status check.
#[derive(Debug, Clone)]
pub struct BatchStatus {
    pub rows: Vec<StatusRow>,
    pub counts: StatusCounts,
}

/// Why an id was left out of a zip bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    NotCompleted,
    OutputMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub job_id: String,
    pub reason: SkipReason,
}

/// A zip archive written to the output directory.
#[derive(Debug, Clone)]
pub struct BundledArchive {
    /// Archive on disk.
    pub path: PathBuf,
    /// Suggested download filename.
    pub filename: String,
    /// Entry names, in request order.
    pub included: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}
