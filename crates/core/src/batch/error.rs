use thiserror::Error;

use crate::service::{ConversionError, ErrorKind};

/// Errors that reject a whole batch call.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Maximum {max} items allowed per batch, got {got}")]
    BatchTooLarge { max: usize, got: usize },

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("No completed conversions with an existing output among the requested ids")]
    NothingToBundle,

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl BatchError {
    /// Stable kind used in API error bodies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            BatchError::EmptyBatch => ErrorKind::EmptyBatch,
            BatchError::NothingToBundle => ErrorKind::NothingToBundle,
            BatchError::Conversion(e) => e.kind(),
            BatchError::Io(_) | BatchError::Zip(_) => ErrorKind::Internal,
        }
    }
}
