//! Conversion job records and their persistence.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{
    refuse_processing, JobFilter, JobGuard, JobMutation, JobStore, JobStoreError, NewJob,
};
pub use types::{ConversionJob, FailureKind, JobState, JobStatus};
