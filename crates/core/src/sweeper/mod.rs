//! Retention sweeper: deletes uploads and outputs older than the retention window.
//!
//! The sweeper reaps by file age only. A completed job's output can disappear
//! while a client is about to download it; downloads then fail with
//! `OutputMissing`.

mod config;
mod runner;

pub use config::RetentionConfig;
pub use runner::{RetentionSweeper, SweepError, SweepReport};
