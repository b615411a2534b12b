//! Retention sweeper implementation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::RetentionConfig;
use crate::job::{refuse_processing, JobFilter, JobStatus, JobStore, JobStoreError};
use crate::metrics;
use crate::storage::{remove_if_exists, FileStorage};

/// Errors that abort a sweep before it finishes.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Listing or deleting job records failed.
    #[error("Record pruning failed: {0}")]
    Store(#[from] JobStoreError),
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Files removed from the upload directory.
    pub uploads_deleted: usize,
    /// Files removed from the output directory.
    pub outputs_deleted: usize,
    /// Deletions that failed and were skipped.
    pub failures: usize,
    /// Job records deleted after their files expired.
    pub records_pruned: usize,
}

impl SweepReport {
    /// Total files removed.
    pub fn files_deleted(&self) -> usize {
        self.uploads_deleted + self.outputs_deleted
    }
}

/// Periodically deletes files older than the retention window.
pub struct RetentionSweeper {
    config: RetentionConfig,
    storage: FileStorage,
    store: Arc<dyn JobStore>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionSweeper {
    /// Create a new sweeper.
    pub fn new(config: RetentionConfig, storage: FileStorage, store: Arc<dyn JobStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            storage,
            store,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background loop. The first sweep runs immediately.
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Retention sweeper disabled");
            return;
        }

        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Retention sweeper already running");
            return;
        }

        info!(
            "Starting retention sweeper (retention {}h, every {}s)",
            self.config.retention_hours, self.config.sweep_interval_secs
        );

        let sweeper = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handle = tokio::spawn(async move {
            info!("Sweeper loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweeper loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match sweeper.sweep_once().await {
                            Ok(report) if report != SweepReport::default() => info!(
                                "Sweep removed {} uploads and {} outputs ({} failures, {} records pruned)",
                                report.uploads_deleted,
                                report.outputs_deleted,
                                report.failures,
                                report.records_pruned
                            ),
                            Ok(_) => debug!("Sweep found nothing to remove"),
                            Err(e) => error!("Sweep failed: {}", e),
                        }
                    }
                }
            }
            info!("Sweeper loop stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the background loop and wait for it to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Retention sweeper not running");
            return;
        }

        info!("Stopping retention sweeper");
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Sweeper task ended abnormally: {}", e);
            }
        }
        info!("Retention sweeper stopped");
    }

    /// Run one sweep over both directories now.
    pub async fn sweep_once(&self) -> Result<SweepReport, SweepError> {
        let cutoff = SystemTime::now()
            .checked_sub(self.config.retention_window())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let (uploads_deleted, upload_failures) =
            Self::sweep_dir(self.storage.upload_dir(), cutoff).await;
        let (outputs_deleted, output_failures) =
            Self::sweep_dir(self.storage.output_dir(), cutoff).await;

        metrics::SWEEPER_FILES_DELETED
            .with_label_values(&["uploads"])
            .inc_by(uploads_deleted as u64);
        metrics::SWEEPER_FILES_DELETED
            .with_label_values(&["outputs"])
            .inc_by(outputs_deleted as u64);
        metrics::SWEEPER_FAILURES.inc_by((upload_failures + output_failures) as u64);

        let records_pruned = if self.config.prune_records {
            self.prune_records().await?
        } else {
            0
        };

        Ok(SweepReport {
            uploads_deleted,
            outputs_deleted,
            failures: upload_failures + output_failures,
            records_pruned,
        })
    }

    /// Delete regular files in `dir` last modified before `cutoff`.
    ///
    /// Returns `(deleted, failures)`. A missing directory counts as empty and
    /// files that vanish mid-sweep are neither deletions nor failures.
    pub async fn sweep_dir(dir: &Path, cutoff: SystemTime) -> (usize, usize) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (0, 0),
            Err(e) => {
                warn!("Cannot read {}: {}", dir.display(), e);
                return (0, 1);
            }
        };

        let mut deleted = 0;
        let mut failures = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error listing {}: {}", dir.display(), e);
                    failures += 1;
                    break;
                }
            };

            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => Err(e),
            };

            match modified {
                Ok(modified) if modified < cutoff => match remove_if_exists(&path).await {
                    Ok(true) => {
                        debug!("Deleted expired file {}", path.display());
                        deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to delete {}: {}", path.display(), e);
                        failures += 1;
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    warn!("Cannot read modification time of {}: {}", path.display(), e);
                    failures += 1;
                }
            }
        }

        (deleted, failures)
    }

    /// Delete records whose upload and output are both gone.
    async fn prune_records(&self) -> Result<usize, SweepError> {
        let jobs = self.store.list(&JobFilter::new().with_limit(i64::MAX))?;
        let mut pruned = 0;

        for job in jobs {
            if job.status() == JobStatus::Processing {
                continue;
            }
            let upload = self.storage.upload_path(&job.stored_filename);
            if tokio::fs::try_exists(&upload).await.unwrap_or(true) {
                continue;
            }
            if let Some(output) = job.output_path() {
                if tokio::fs::try_exists(output).await.unwrap_or(true) {
                    continue;
                }
            }

            // Re-checked under the store lock: a claim may have landed since the list.
            match self.store.delete(&job.id, &mut refuse_processing) {
                Ok(_) => {
                    debug!("Pruned expired conversion {}", job.id);
                    pruned += 1;
                }
                Err(JobStoreError::NotFound(_)) | Err(JobStoreError::Aborted(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        metrics::SWEEPER_RECORDS_PRUNED.inc_by(pruned as u64);
        Ok(pruned)
    }
}
