//! Conversion lifecycle service.
//!
//! [`ConversionService`] owns the state machine of a conversion job:
//!
//! ```text
//! uploaded -> processing -> completed
//!                  |
//!                  +-------> failed -> processing (retry)
//! ```
//!
//! It validates every request against the format registry, claims the job
//! atomically, runs the plugin on a worker task bounded by a semaphore and a
//! wall-clock timeout, and records the outcome.

mod config;
mod error;
mod lifecycle;

pub use config::ConversionConfig;
pub use error::{ConversionError, ErrorKind};
pub use lifecycle::{ConversionService, DownloadableFile, DEFAULT_MAX_UPLOAD_BYTES};
pub(crate) use lifecycle::download_filename;
