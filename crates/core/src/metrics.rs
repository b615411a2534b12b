//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Conversion lifecycle (attempts by category and result, duration)
//! - Retention sweeper (files deleted, deletion failures, records pruned)
//! - Batch operations (batch sizes)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Conversions
// =============================================================================

/// Conversions total by category and result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("transmute_conversions_total", "Total conversion attempts"),
        &["category", "result"], // result: "completed", "failed", "unsupported"
    )
    .unwrap()
});

/// Conversion duration in seconds.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "transmute_conversion_duration_seconds",
            "Wall-clock duration of plugin invocations",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        &["category"],
    )
    .unwrap()
});

/// Conversion requests rejected before reaching a plugin.
pub static CONVERSIONS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "transmute_conversions_rejected_total",
            "Conversion requests rejected during the claim step",
        ),
        &["kind"],
    )
    .unwrap()
});

/// Uploads accepted.
pub static UPLOADS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("transmute_uploads_total", "Total uploads registered as jobs").unwrap()
});

// =============================================================================
// Retention sweeper
// =============================================================================

/// Files deleted by the sweeper, by directory.
pub static SWEEPER_FILES_DELETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "transmute_sweeper_files_deleted_total",
            "Files removed by the retention sweeper",
        ),
        &["dir"], // "uploads", "outputs"
    )
    .unwrap()
});

/// Deletions the sweeper failed and skipped.
pub static SWEEPER_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "transmute_sweeper_failures_total",
        "File deletions the retention sweeper could not complete",
    )
    .unwrap()
});

/// Job records pruned by the sweeper.
pub static SWEEPER_RECORDS_PRUNED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "transmute_sweeper_records_pruned_total",
        "Job records deleted after their files expired",
    )
    .unwrap()
});

// =============================================================================
// Batch
// =============================================================================

/// Items per batch request, by operation.
pub static BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("transmute_batch_size", "Number of items per batch request")
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 15.0, 20.0]),
        &["operation"], // "upload", "convert", "status", "zip"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Conversions
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(CONVERSIONS_REJECTED.clone()),
        Box::new(UPLOADS_TOTAL.clone()),
        // Sweeper
        Box::new(SWEEPER_FILES_DELETED.clone()),
        Box::new(SWEEPER_FAILURES.clone()),
        Box::new(SWEEPER_RECORDS_PRUNED.clone()),
        // Batch
        Box::new(BATCH_SIZE.clone()),
    ]
}
