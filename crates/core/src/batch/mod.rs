//! Batch operations over up to [`MAX_BATCH_SIZE`] conversion jobs.
//!
//! Each item runs through [`ConversionService`](crate::service::ConversionService)
//! on its own. A failing item is reported in its result slot and never aborts
//! its siblings. Results come back in request order.

mod coordinator;
mod error;
mod types;

pub use coordinator::BatchCoordinator;
pub use error::BatchError;
pub use types::{
    BatchStatus, BundledArchive, ConvertOutcome, ReceivedFile, SkipReason, SkippedEntry,
    StatusCounts, StatusRow, UploadOutcome,
};

/// Maximum number of files or ids accepted by one batch call.
pub const MAX_BATCH_SIZE: usize = 20;
