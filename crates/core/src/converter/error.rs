//! Error types for converter plugins.

use std::path::PathBuf;
use thiserror::Error;

/// Errors a converter plugin can return.
///
/// [`ConverterError::Unsupported`] means the plugin has no logic for the pair;
/// every other variant means the plugin ran and the underlying operation failed.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// The plugin does not implement this source/target pair.
    #[error("Conversion from {source_format} to {target_format} is not implemented")]
    Unsupported {
        source_format: String,
        target_format: String,
    },

    /// External tool binary not found.
    #[error("Conversion tool not found: {program}")]
    ToolNotFound { program: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Output directory does not exist and could not be created.
    #[error("Failed to create output directory: {path}")]
    OutputDirectoryFailed { path: PathBuf },

    /// The conversion process failed.
    #[error("Conversion failed: {reason}")]
    ConversionFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Conversion timed out.
    #[error("Conversion timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConverterError {
    /// Creates a new unsupported-pair error.
    pub fn unsupported(source_format: impl Into<String>, target_format: impl Into<String>) -> Self {
        Self::Unsupported {
            source_format: source_format.into(),
            target_format: target_format.into(),
        }
    }

    /// Creates a new conversion failed error with stderr output.
    pub fn conversion_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Whether the plugin declined the pair instead of failing while running.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Human-readable detail, including captured stderr when there is any.
    pub fn detail(&self) -> String {
        match self {
            Self::ConversionFailed {
                reason,
                stderr: Some(stderr),
            } if !stderr.trim().is_empty() => format!("{}: {}", reason, stderr.trim()),
            other => other.to_string(),
        }
    }
}
