//! Request type handed to converter plugins.

use std::path::PathBuf;

/// A single plugin invocation: where to read, where to write, and which formats.
///
/// Format tokens are already normalized (lowercase, no leading dot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Job this invocation belongs to (for logging only).
    pub job_id: String,
    /// Stored upload to read.
    pub input_path: PathBuf,
    /// Where the plugin should write its result.
    pub output_path: PathBuf,
    /// Source format token.
    pub source_format: String,
    /// Target format token, or the operation name for operations.
    pub target_format: String,
}

impl ConversionRequest {
    /// Creates a new request.
    pub fn new(
        job_id: impl Into<String>,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        source_format: impl Into<String>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            source_format: source_format.into(),
            target_format: target_format.into(),
        }
    }
}
