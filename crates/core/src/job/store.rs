//! Job storage trait and types.

use thiserror::Error;

use super::types::{ConversionJob, JobStatus};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The update would move the job backwards in the state machine.
    #[error("Cannot move job {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// The updated record breaks a record invariant.
    #[error("Job {job_id} is inconsistent: {reason}")]
    InvariantViolation { job_id: String, reason: String },

    /// The mutation declined to change the job. Nothing was written.
    #[error("Update of job {0} was aborted")]
    Aborted(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for JobStoreError {
    fn from(e: rusqlite::Error) -> Self {
        JobStoreError::Database(e.to_string())
    }
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Name the client uploaded the file under.
    pub original_filename: String,
    /// Name of the stored upload.
    pub stored_filename: String,
    /// Source format token.
    pub source_format: String,
    /// Size of the upload in bytes.
    pub file_size_bytes: u64,
    /// Client address, if known.
    pub originator: Option<String>,
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// In-place change applied to a job under the store lock.
pub type JobMutation<'a> = dyn FnMut(&mut ConversionJob) -> Result<(), JobStoreError> + 'a;

/// Check run against the current record under the store lock before a delete.
pub type JobGuard<'a> = dyn FnMut(&ConversionJob) -> Result<(), JobStoreError> + 'a;

/// Delete guard that keeps jobs with an attempt in flight.
pub fn refuse_processing(job: &ConversionJob) -> Result<(), JobStoreError> {
    if job.status() == JobStatus::Processing {
        return Err(JobStoreError::Aborted(job.id.clone()));
    }
    Ok(())
}

/// Trait for job storage backends.
pub trait JobStore: Send + Sync {
    /// Create a new job in the `uploaded` state.
    fn create(&self, job: NewJob) -> Result<ConversionJob, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<ConversionJob>, JobStoreError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<ConversionJob>, JobStoreError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Apply `mutation` to the job atomically.
    ///
    /// Concurrent updates of the same id serialize. If the mutation returns an
    /// error, or the result breaks the state machine, nothing is written.
    fn update(&self, id: &str, mutation: &mut JobMutation<'_>)
        -> Result<ConversionJob, JobStoreError>;

    /// Delete the job record if `guard` accepts it. Stored files are the
    /// caller's responsibility. Returns the deleted job.
    ///
    /// The guard sees the record as it is at delete time; an error from it
    /// leaves the record in place.
    fn delete(&self, id: &str, guard: &mut JobGuard<'_>) -> Result<ConversionJob, JobStoreError>;
}
