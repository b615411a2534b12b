//! Conversion job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Flat status of a job, as reported to clients and used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(JobStatus::Uploaded),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Why a job ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stored upload was gone when the conversion started.
    InputMissing,
    /// No plugin logic for the pair.
    UnsupportedConversion,
    /// The plugin ran and failed (including timeouts).
    ConversionFailure,
    /// The process stopped while the job was processing.
    Interrupted,
}

impl FailureKind {
    /// Returns the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputMissing => "input_missing",
            FailureKind::UnsupportedConversion => "unsupported_conversion",
            FailureKind::ConversionFailure => "conversion_failure",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

/// State of a conversion job.
///
/// ```text
/// Uploaded -> Processing -> Completed
///                  |
///                  +------> Failed -> Processing (retry)
/// ```
///
/// The output path exists only on `Completed` and the error only on `Failed`,
/// so the record can never carry both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    /// Upload stored, no conversion requested yet.
    Uploaded,

    /// A conversion attempt is running.
    Processing { started_at: DateTime<Utc> },

    /// Conversion succeeded (terminal).
    Completed {
        output_path: PathBuf,
        completed_at: DateTime<Utc>,
    },

    /// Conversion failed. A new attempt may be requested.
    Failed {
        error: String,
        kind: FailureKind,
        failed_at: DateTime<Utc>,
    },
}

impl JobState {
    /// Flat status for this state.
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Uploaded => JobStatus::Uploaded,
            JobState::Processing { .. } => JobStatus::Processing,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }

    /// Returns the state type as a string (for filtering).
    pub fn state_type(&self) -> &'static str {
        self.status().as_str()
    }

    /// Returns true once the attempt has resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }

    /// Whether moving from this state to `next` follows the state machine.
    ///
    /// Writing the same status again (for example refreshing a failure) is allowed,
    /// except for `completed`: its output is set exactly once.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobStatus::*;
        matches!(
            (self.status(), next.status()),
            (Uploaded, Uploaded)
                | (Uploaded, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Failed)
                | (Failed, Processing)
        )
    }

    /// Output path, set only when completed.
    pub fn output_path(&self) -> Option<&Path> {
        match self {
            JobState::Completed { output_path, .. } => Some(output_path),
            _ => None,
        }
    }

    /// Error message, set only when failed.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// When the attempt resolved, for either terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Completed { completed_at, .. } => Some(*completed_at),
            JobState::Failed { failed_at, .. } => Some(*failed_at),
            _ => None,
        }
    }

    /// Failure kind, set only when failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            JobState::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// A single requested file conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionJob {
    /// Unique identifier (UUID).
    pub id: String,

    /// Name the client uploaded the file under.
    pub original_filename: String,

    /// Collision-resistant name of the stored upload.
    pub stored_filename: String,

    /// Source format token.
    pub source_format: String,

    /// Target format token (or operation name), set when a conversion is requested.
    pub target_format: Option<String>,

    /// Size of the upload in bytes.
    pub file_size_bytes: u64,

    /// Current state.
    pub state: JobState,

    /// Client address the upload came from, if known.
    pub originator: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job was last modified.
    pub updated_at: DateTime<Utc>,
}

impl ConversionJob {
    /// Flat status.
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    /// Output path, set only when completed.
    pub fn output_path(&self) -> Option<&Path> {
        self.state.output_path()
    }

    /// Error message, set only when failed.
    pub fn error_message(&self) -> Option<&str> {
        self.state.error_message()
    }

    /// When the last attempt resolved.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.completed_at()
    }

    /// Checks the record-level invariants that the state enum alone cannot express.
    pub fn check_invariants(&self) -> Result<(), String> {
        match &self.state {
            JobState::Processing { .. } | JobState::Completed { .. }
                if self.target_format.as_deref().map_or(true, str::is_empty) =>
            {
                Err(format!(
                    "target format must be set before {}",
                    self.state.state_type()
                ))
            }
            JobState::Completed { output_path, .. } if output_path.as_os_str().is_empty() => {
                Err("completed job has an empty output path".to_string())
            }
            JobState::Failed { error, .. } if error.is_empty() => {
                Err("failed job has an empty error message".to_string())
            }
            _ => Ok(()),
        }
    }
}
