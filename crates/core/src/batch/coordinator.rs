use chrono::Utc;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::error::BatchError;
use super::types::{
    BatchStatus, BundledArchive, ConvertOutcome, ReceivedFile, SkipReason, SkippedEntry,
    StatusCounts, StatusRow, UploadOutcome,
};
use super::MAX_BATCH_SIZE;
use crate::job::{ConversionJob, JobStatus};
use crate::metrics;
use crate::service::{download_filename, ConversionError, ConversionService};
use crate::storage::{remove_if_exists, FileStorage};

/// Fans batch requests out over a [`ConversionService`].
#[derive(Clone)]
pub struct BatchCoordinator {
    service: ConversionService,
}

impl BatchCoordinator {
    pub fn new(service: ConversionService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &ConversionService {
        &self.service
    }

    /// Rejects empty and oversized batches.
    pub fn check_size(len: usize) -> Result<(), BatchError> {
        if len == 0 {
            return Err(BatchError::EmptyBatch);
        }
        if len > MAX_BATCH_SIZE {
            return Err(BatchError::BatchTooLarge {
                max: MAX_BATCH_SIZE,
                got: len,
            });
        }
        Ok(())
    }

    /// Registers each received file as a job.
    ///
    /// A file whose record cannot be created has its stored bytes removed.
    pub async fn upload(
        &self,
        files: Vec<ReceivedFile>,
        originator: Option<String>,
    ) -> Result<Vec<UploadOutcome>, BatchError> {
        Self::check_size(files.len())?;
        metrics::BATCH_SIZE
            .with_label_values(&["upload"])
            .observe(files.len() as f64);

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let result = match file.upload {
                Ok(stored) => {
                    let path = stored.path.clone();
                    let registered = self.service.register_upload(stored, originator.clone());
                    if registered.is_err() {
                        if let Err(e) = remove_if_exists(&path).await {
                            warn!("Failed to remove orphaned upload {}: {}", path.display(), e);
                        }
                    }
                    registered
                }
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                debug!("Batch upload of {} rejected: {}", file.original_filename, e);
            }
            outcomes.push(UploadOutcome {
                original_filename: file.original_filename,
                result,
            });
        }

        let accepted = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!("Batch upload: {}/{} files accepted", accepted, outcomes.len());
        Ok(outcomes)
    }

    /// Queues a conversion of every id to `target_format`.
    ///
    /// Each id is claimed on its own; the plugin runs are left detached.
    pub async fn convert(
        &self,
        ids: &[String],
        target_format: &str,
    ) -> Result<Vec<ConvertOutcome>, BatchError> {
        Self::check_size(ids.len())?;
        metrics::BATCH_SIZE
            .with_label_values(&["convert"])
            .observe(ids.len() as f64);

        let claims: Vec<_> = ids
            .iter()
            .map(|id| async move {
                let result = self.service.enqueue_conversion(id, target_format).await;
                ConvertOutcome {
                    job_id: id.clone(),
                    result,
                }
            })
            .collect();

        let outcomes = futures::future::join_all(claims).await;

        let queued = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            "Batch convert to {}: {}/{} queued",
            target_format,
            queued,
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// Reports the status of each id plus aggregate counts.
    pub fn status(&self, ids: &[String]) -> Result<BatchStatus, BatchError> {
        Self::check_size(ids.len())?;
        metrics::BATCH_SIZE
            .with_label_values(&["status"])
            .observe(ids.len() as f64);

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let job = match self.service.get_job(id) {
                Ok(job) => Some(job),
                Err(ConversionError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            rows.push(StatusRow {
                job_id: id.clone(),
                job,
            });
        }

        let counts = StatusCounts::from_rows(&rows);
        Ok(BatchStatus { rows, counts })
    }

    /// Writes the outputs of the completed ids into one zip archive.
    ///
    /// Ids that are unknown, not completed, or whose output is gone are
    /// skipped. Fails with `NothingToBundle` when no id qualifies.
    pub async fn bundle_zip(&self, ids: &[String]) -> Result<BundledArchive, BatchError> {
        Self::check_size(ids.len())?;
        metrics::BATCH_SIZE
            .with_label_values(&["download_zip"])
            .observe(ids.len() as f64);

        let mut seen = HashSet::new();
        let mut names = EntryNames::default();
        let mut entries: Vec<(PathBuf, String)> = Vec::new();
        let mut skipped = Vec::new();

        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let skip = |reason| SkippedEntry {
                job_id: id.clone(),
                reason,
            };

            let job = match self.service.get_job(id) {
                Ok(job) => job,
                Err(ConversionError::NotFound { .. }) => {
                    skipped.push(skip(SkipReason::NotFound));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let Some(output) = job.output_path().filter(|_| job.status() == JobStatus::Completed)
            else {
                skipped.push(skip(SkipReason::NotCompleted));
                continue;
            };
            if !tokio::fs::try_exists(output).await.unwrap_or(false) {
                skipped.push(skip(SkipReason::OutputMissing));
                continue;
            }

            entries.push((output.to_path_buf(), names.claim(&entry_name(&job))));
        }

        if entries.is_empty() {
            return Err(BatchError::NothingToBundle);
        }

        let now = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("batch_conversion_{}.zip", now);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = self
            .service
            .storage()
            .output_dir()
            .join(format!("batch_conversion_{}_{}.zip", now, &suffix[..8]));

        let included: Vec<String> = entries.iter().map(|(_, name)| name.clone()).collect();
        let archive_path = path.clone();
        let written = tokio::task::spawn_blocking(move || write_zip(&archive_path, &entries))
            .await
            .map_err(|e| BatchError::Io(std::io::Error::other(e)))?;

        if let Err(e) = written {
            if let Err(cleanup) = remove_if_exists(&path).await {
                warn!("Failed to remove partial archive {}: {}", path.display(), cleanup);
            }
            return Err(e);
        }

        info!(
            "Bundled {} outputs into {} ({} skipped)",
            included.len(),
            path.display(),
            skipped.len()
        );

        Ok(BundledArchive {
            path,
            filename,
            included,
            skipped,
        })
    }
}

/// Archive entry for a job's output: its download name as one safe path component.
fn entry_name(job: &ConversionJob) -> String {
    let name = download_filename(job);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!(
            "{}.{}",
            FileStorage::sanitize_stem(stem),
            FileStorage::sanitize_stem(ext)
        ),
        _ => FileStorage::sanitize_stem(&name),
    }
}

fn write_zip(path: &Path, entries: &[(PathBuf, String)]) -> Result<(), BatchError> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (source, name) in entries {
        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(source)?;
        std::io::copy(&mut input, &mut zip)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(())
}

/// Hands out unique archive entry names: `a.pdf`, `a_2.pdf`, `a_3.pdf`, ...
#[derive(Default)]
struct EntryNames {
    used: HashSet<String>,
}

impl EntryNames {
    fn claim(&mut self, name: &str) -> String {
        if self.used.insert(name.to_string()) {
            return name.to_string();
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name, None),
        };
        let mut n = 2;
        loop {
            let candidate = match ext {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
