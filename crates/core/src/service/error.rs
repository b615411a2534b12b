//! Errors surfaced by the conversion lifecycle.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::formats::FormatError;
use crate::job::{FailureKind, JobStatus, JobStoreError};
use crate::storage::StorageError;

/// Stable machine-readable error kind, used in API error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    UnsupportedFormat,
    InvalidConversion,
    InputMissing,
    UnsupportedConversion,
    ConversionFailure,
    SizeExceeded,
    AlreadyTerminal,
    InProgress,
    NotReady,
    OutputMissing,
    BatchTooLarge,
    EmptyBatch,
    NothingToBundle,
    /// Malformed request (missing field, bad multipart body).
    InvalidRequest,
    /// Client exceeded the request rate.
    RateLimited,
    Internal,
}

impl ErrorKind {
    /// Returns the kind as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::InvalidConversion => "invalid_conversion",
            ErrorKind::InputMissing => "input_missing",
            ErrorKind::UnsupportedConversion => "unsupported_conversion",
            ErrorKind::ConversionFailure => "conversion_failure",
            ErrorKind::SizeExceeded => "size_exceeded",
            ErrorKind::AlreadyTerminal => "already_terminal",
            ErrorKind::InProgress => "in_progress",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::OutputMissing => "output_missing",
            ErrorKind::BatchTooLarge => "batch_too_large",
            ErrorKind::EmptyBatch => "empty_batch",
            ErrorKind::NothingToBundle => "nothing_to_bundle",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`ConversionService`](super::ConversionService).
#[derive(Debug, Error)]
pub enum ConversionError {
    /// No job with this id.
    #[error("Conversion not found: {job_id}")]
    NotFound { job_id: String },

    /// The format token is not registered.
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// The source/target pair is not a legal conversion.
    #[error("Invalid conversion: {reason}")]
    InvalidConversion { reason: String },

    /// The stored upload is gone.
    #[error("Input file for conversion {job_id} is missing: {path}")]
    InputMissing { job_id: String, path: PathBuf },

    /// The pair is valid but no plugin implements it.
    #[error("Conversion not implemented: {detail}")]
    UnsupportedConversion { detail: String },

    /// The plugin ran and failed.
    #[error("Conversion failed: {detail}")]
    ConversionFailure { detail: String },

    /// The upload exceeded the size limit.
    #[error("File exceeds maximum allowed size of {limit_bytes} bytes")]
    SizeExceeded { limit_bytes: u64 },

    /// The job already completed.
    #[error("Conversion {job_id} has already completed")]
    AlreadyTerminal { job_id: String },

    /// A conversion attempt for the job is running.
    #[error("Conversion {job_id} is already processing")]
    InProgress { job_id: String },

    /// The job has no output to download yet.
    #[error("Conversion {job_id} is not completed (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    /// The job completed but its output file is gone.
    #[error("Output file for conversion {job_id} no longer exists")]
    OutputMissing { job_id: String },

    /// Job store failure.
    #[error(transparent)]
    Store(JobStoreError),

    /// Storage failure.
    #[error(transparent)]
    Storage(StorageError),
}

impl ConversionError {
    /// Stable kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::NotFound { .. } => ErrorKind::NotFound,
            ConversionError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ConversionError::InvalidConversion { .. } => ErrorKind::InvalidConversion,
            ConversionError::InputMissing { .. } => ErrorKind::InputMissing,
            ConversionError::UnsupportedConversion { .. } => ErrorKind::UnsupportedConversion,
            ConversionError::ConversionFailure { .. } => ErrorKind::ConversionFailure,
            ConversionError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            ConversionError::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            ConversionError::InProgress { .. } => ErrorKind::InProgress,
            ConversionError::NotReady { .. } => ErrorKind::NotReady,
            ConversionError::OutputMissing { .. } => ErrorKind::OutputMissing,
            ConversionError::Store(_) | ConversionError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Failure kind recorded on the job when this error ends an attempt.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ConversionError::InputMissing { .. } => FailureKind::InputMissing,
            ConversionError::UnsupportedConversion { .. } => FailureKind::UnsupportedConversion,
            _ => FailureKind::ConversionFailure,
        }
    }
}

impl From<FormatError> for ConversionError {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::UnsupportedFormat { format } => ConversionError::UnsupportedFormat { format },
            other => ConversionError::InvalidConversion {
                reason: other.to_string(),
            },
        }
    }
}

impl From<JobStoreError> for ConversionError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(job_id) => ConversionError::NotFound { job_id },
            other => ConversionError::Store(other),
        }
    }
}

impl From<StorageError> for ConversionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::SizeExceeded { limit_bytes } => ConversionError::SizeExceeded { limit_bytes },
            other => ConversionError::Storage(other),
        }
    }
}
