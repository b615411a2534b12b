//! Conversion job lifecycle: upload, claim, dispatch, resolve.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use super::config::ConversionConfig;
use super::error::ConversionError;
use crate::converter::{ConversionRequest, ConverterDispatch};
use crate::formats::{normalize_format, Category, FormatRegistry};
use crate::job::{
    refuse_processing, ConversionJob, FailureKind, JobFilter, JobState, JobStatus, JobStore,
    JobStoreError, NewJob,
};
use crate::metrics;
use crate::storage::{FileStorage, StoredUpload, UploadWriter};

/// Default upload limit (50 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// What a claimed attempt will run.
#[derive(Debug, Clone)]
enum Attempt {
    /// A format conversion routed by the source category.
    Convert { category: Category },
    /// A named operation.
    Operation,
}

impl Attempt {
    fn label(&self) -> &'static str {
        match self {
            Attempt::Convert { category } => category.as_str(),
            Attempt::Operation => "operation",
        }
    }
}

/// A completed output ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadableFile {
    /// Output file on disk.
    pub path: PathBuf,
    /// Suggested filename: the original stem with the target extension.
    pub filename: String,
}

/// Orchestrates conversion jobs from upload to a terminal state.
///
/// Every attempt is claimed atomically through [`JobStore::update`], so at most
/// one plugin invocation runs per job. The plugin itself runs in a spawned task;
/// callers that stop waiting never leave a job stuck in `processing`.
#[derive(Clone)]
pub struct ConversionService {
    registry: Arc<FormatRegistry>,
    dispatch: Arc<ConverterDispatch>,
    store: Arc<dyn JobStore>,
    storage: FileStorage,
    config: ConversionConfig,
    max_upload_bytes: u64,
    permits: Arc<Semaphore>,
}

impl ConversionService {
    /// Creates a service using the standard format registry.
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatch: Arc<ConverterDispatch>,
        storage: FileStorage,
        config: ConversionConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel.max(1)));
        Self {
            registry: Arc::new(FormatRegistry::standard()),
            dispatch,
            store,
            storage,
            config,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            permits,
        }
    }

    /// Replaces the format registry.
    pub fn with_registry(mut self, registry: FormatRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Sets the upload size limit in bytes.
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// The format registry consulted before every attempt.
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// The job store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// The upload and output directories.
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    /// The plugin dispatch table.
    pub fn dispatch(&self) -> &ConverterDispatch {
        &self.dispatch
    }

    /// Upload size limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// All supported formats grouped by category.
    pub fn supported_formats(&self) -> BTreeMap<Category, BTreeSet<String>> {
        self.registry.all_supported()
    }

    // =========================================================================
    // Uploads and records
    // =========================================================================

    /// Opens an upload writer after checking the extension is a known format.
    pub async fn begin_upload(&self, original_filename: &str) -> Result<UploadWriter, ConversionError> {
        let format = FileStorage::source_format(original_filename);
        if !self.registry.is_supported(&format) {
            return Err(ConversionError::UnsupportedFormat { format });
        }
        Ok(self
            .storage
            .begin_upload(original_filename, self.max_upload_bytes)
            .await?)
    }

    /// Creates the job record for a fully written upload.
    pub fn register_upload(
        &self,
        upload: StoredUpload,
        originator: Option<String>,
    ) -> Result<ConversionJob, ConversionError> {
        if upload.size_bytes > self.max_upload_bytes {
            return Err(ConversionError::SizeExceeded {
                limit_bytes: self.max_upload_bytes,
            });
        }
        self.create_job(NewJob {
            original_filename: upload.original_filename,
            stored_filename: upload.stored_filename,
            source_format: upload.source_format,
            file_size_bytes: upload.size_bytes,
            originator,
        })
    }

    /// Creates a job in the `uploaded` state.
    pub fn create_job(&self, new_job: NewJob) -> Result<ConversionJob, ConversionError> {
        let job = self.store.create(new_job)?;
        metrics::UPLOADS_TOTAL.inc();
        info!(
            "Created conversion {} for {} ({} bytes, {})",
            job.id, job.original_filename, job.file_size_bytes, job.source_format
        );
        Ok(job)
    }

    /// Fetches a job.
    pub fn get_job(&self, id: &str) -> Result<ConversionJob, ConversionError> {
        self.store.get(id)?.ok_or_else(|| ConversionError::NotFound {
            job_id: id.to_string(),
        })
    }

    /// Lists jobs, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ConversionJob>, ConversionError> {
        Ok(self.store.list(filter)?)
    }

    /// Counts jobs.
    pub fn count_jobs(&self, filter: &JobFilter) -> Result<i64, ConversionError> {
        Ok(self.store.count(filter)?)
    }

    /// Removes the job's record, then its files. Refused while processing.
    ///
    /// The status check and the record delete are one store operation, so a
    /// concurrent claim either wins (and the delete is refused) or finds no job.
    /// Files left behind by a failed removal are reaped by the sweeper.
    pub async fn delete_job(&self, id: &str) -> Result<ConversionJob, ConversionError> {
        let deleted = match self.store.delete(id, &mut refuse_processing) {
            Ok(job) => job,
            Err(JobStoreError::Aborted(_)) => {
                return Err(ConversionError::InProgress {
                    job_id: id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        match self.storage.remove_job_files(&deleted).await {
            Ok(removed) => info!("Deleted conversion {} ({} files removed)", id, removed),
            Err(e) => warn!("Deleted conversion {} but its files remain: {}", id, e),
        }
        Ok(deleted)
    }

    /// Resolves the output file of a completed job.
    pub async fn download(&self, id: &str) -> Result<DownloadableFile, ConversionError> {
        let job = self.get_job(id)?;
        let Some(path) = job.output_path() else {
            return Err(ConversionError::NotReady {
                job_id: job.id.clone(),
                status: job.status(),
            });
        };

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ConversionError::OutputMissing {
                job_id: job.id.clone(),
            });
        }

        Ok(DownloadableFile {
            path: path.to_path_buf(),
            filename: download_filename(&job),
        })
    }

    /// Moves jobs left in `processing` by a previous run to `failed`.
    pub fn recover_interrupted(&self) -> Result<usize, ConversionError> {
        let stuck = self.store.list(
            &JobFilter::new()
                .with_status(JobStatus::Processing)
                .with_limit(i64::MAX),
        )?;

        let mut recovered = 0;
        for job in stuck {
            let result = self.store.update(&job.id, &mut |job| {
                if job.status() != JobStatus::Processing {
                    return Err(JobStoreError::Aborted(job.id.clone()));
                }
                job.state = JobState::Failed {
                    error: "Interrupted by restart".to_string(),
                    kind: FailureKind::Interrupted,
                    failed_at: Utc::now(),
                };
                Ok(())
            });
            match result {
                Ok(_) => {
                    info!("Recovered interrupted conversion {}", job.id);
                    recovered += 1;
                }
                Err(JobStoreError::Aborted(_)) => {}
                Err(e) => warn!("Failed to recover conversion {}: {}", job.id, e),
            }
        }
        Ok(recovered)
    }

    // =========================================================================
    // Conversion attempts
    // =========================================================================

    /// Converts the job to `target_format` and waits for the attempt to resolve.
    ///
    /// On a plugin failure the job is persisted as `failed` and the error is
    /// returned.
    pub async fn request_conversion(
        &self,
        id: &str,
        target_format: &str,
    ) -> Result<ConversionJob, ConversionError> {
        let (_, handle) = self.start_conversion(id, target_format).await?;
        self.await_attempt(id, handle).await
    }

    /// Claims the job and starts the conversion without waiting for it.
    ///
    /// Returns the job in `processing`.
    pub async fn enqueue_conversion(
        &self,
        id: &str,
        target_format: &str,
    ) -> Result<ConversionJob, ConversionError> {
        let (job, handle) = self.start_conversion(id, target_format).await?;

        let service = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = service.await_attempt(&job_id, handle).await {
                debug!("Queued conversion {} resolved with error: {}", job_id, e);
            }
        });

        Ok(job)
    }

    /// Runs a named operation (such as `sha256`) on the job and waits for it.
    pub async fn request_operation(
        &self,
        id: &str,
        operation: &str,
    ) -> Result<ConversionJob, ConversionError> {
        let operation = normalize_format(operation);
        let Some(extension) = self.dispatch.operation_extension(&operation).map(str::to_string)
        else {
            return Err(ConversionError::UnsupportedConversion {
                detail: format!("Unknown operation: {}", operation),
            });
        };

        let (job, attempt) = self.claim(id, &operation, |_| Ok(Attempt::Operation))?;
        let output_path = self.storage.output_path(&job.stored_filename, &extension);
        let (_, handle) = self.launch(job, attempt, output_path).await?;
        self.await_attempt(id, handle).await
    }

    async fn start_conversion(
        &self,
        id: &str,
        target_format: &str,
    ) -> Result<(ConversionJob, JoinHandle<Result<ConversionJob, ConversionError>>), ConversionError>
    {
        let target = normalize_format(target_format);
        let (job, attempt) = self.claim(id, &target, |job| {
            let category = self.registry.validate_conversion(&job.source_format, &target)?;
            Ok(Attempt::Convert { category })
        })?;

        let output_path = self.storage.output_path(&job.stored_filename, &target);
        self.launch(job, attempt, output_path).await
    }

    /// Atomically checks the job can start an attempt and moves it to `processing`.
    fn claim<F>(
        &self,
        id: &str,
        target: &str,
        validate: F,
    ) -> Result<(ConversionJob, Attempt), ConversionError>
    where
        F: Fn(&ConversionJob) -> Result<Attempt, ConversionError>,
    {
        let mut rejection: Option<ConversionError> = None;
        let mut accepted: Option<Attempt> = None;

        let result = self.store.update(id, &mut |job| {
            let check = match job.status() {
                JobStatus::Completed => Err(ConversionError::AlreadyTerminal {
                    job_id: job.id.clone(),
                }),
                JobStatus::Processing => Err(ConversionError::InProgress {
                    job_id: job.id.clone(),
                }),
                JobStatus::Uploaded | JobStatus::Failed => validate(&*job),
            };

            match check {
                Ok(attempt) => {
                    accepted = Some(attempt);
                    job.target_format = Some(target.to_string());
                    job.state = JobState::Processing {
                        started_at: Utc::now(),
                    };
                    Ok(())
                }
                Err(e) => {
                    rejection = Some(e);
                    Err(JobStoreError::Aborted(job.id.clone()))
                }
            }
        });

        match (result, accepted) {
            (Ok(job), Some(attempt)) => {
                info!(
                    "Conversion {} processing: {} -> {}",
                    job.id, job.source_format, target
                );
                Ok((job, attempt))
            }
            (Ok(job), None) => Err(ConversionError::InProgress { job_id: job.id }),
            (Err(JobStoreError::Aborted(_)), _) => {
                let err = rejection.unwrap_or_else(|| ConversionError::InProgress {
                    job_id: id.to_string(),
                });
                metrics::CONVERSIONS_REJECTED
                    .with_label_values(&[err.kind().as_str()])
                    .inc();
                debug!("Conversion {} rejected: {}", id, err);
                Err(err)
            }
            (Err(e), _) => Err(e.into()),
        }
    }

    /// Checks the input still exists and spawns the plugin run.
    async fn launch(
        &self,
        job: ConversionJob,
        attempt: Attempt,
        output_path: PathBuf,
    ) -> Result<(ConversionJob, JoinHandle<Result<ConversionJob, ConversionError>>), ConversionError>
    {
        let input_path = self.storage.upload_path(&job.stored_filename);
        if !tokio::fs::try_exists(&input_path).await.unwrap_or(false) {
            let err = ConversionError::InputMissing {
                job_id: job.id.clone(),
                path: input_path,
            };
            self.record_failure(&job.id, &err)?;
            return Err(err);
        }

        let request = ConversionRequest::new(
            job.id.clone(),
            input_path,
            output_path,
            job.source_format.clone(),
            job.target_format.clone().unwrap_or_default(),
        );

        let service = self.clone();
        let handle = tokio::spawn(async move { service.run_attempt(request, attempt).await });
        Ok((job, handle))
    }

    async fn await_attempt(
        &self,
        id: &str,
        handle: JoinHandle<Result<ConversionJob, ConversionError>>,
    ) -> Result<ConversionJob, ConversionError> {
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Conversion task for {} aborted: {}", id, e);
                let err = ConversionError::ConversionFailure {
                    detail: format!("Conversion task aborted: {}", e),
                };
                if let Err(store_err) = self.record_failure(id, &err) {
                    warn!("Failed to mark conversion {} as failed: {}", id, store_err);
                }
                Err(err)
            }
        }
    }

    /// Runs the plugin and persists the outcome. Executed on a spawned task.
    async fn run_attempt(
        &self,
        request: ConversionRequest,
        attempt: Attempt,
    ) -> Result<ConversionJob, ConversionError> {
        let job_id = request.job_id.clone();
        let label = attempt.label();

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let err = ConversionError::ConversionFailure {
                    detail: "Conversion workers are shut down".to_string(),
                };
                self.record_failure(&job_id, &err)?;
                return Err(err);
            }
        };

        let start = Instant::now();
        let run = async {
            match attempt {
                Attempt::Convert { category } => self.dispatch.convert(request, category).await,
                Attempt::Operation => self.dispatch.run_operation(request).await,
            }
        };
        let result = timeout(
            Duration::from_secs(self.config.timeout_secs),
            AssertUnwindSafe(run).catch_unwind(),
        )
        .await;

        metrics::CONVERSION_DURATION
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(Ok(Ok(path))) => Ok(path),
            Ok(Ok(Err(e))) if e.is_unsupported() => Err(ConversionError::UnsupportedConversion {
                detail: e.detail(),
            }),
            Ok(Ok(Err(e))) => Err(ConversionError::ConversionFailure { detail: e.detail() }),
            Ok(Err(payload)) => Err(ConversionError::ConversionFailure {
                detail: format!("Converter panicked: {}", panic_message(&*payload)),
            }),
            Err(_) => Err(ConversionError::ConversionFailure {
                detail: format!(
                    "Conversion timed out after {} seconds",
                    self.config.timeout_secs
                ),
            }),
        };

        match outcome {
            Ok(output_path) => {
                let job = self.store.update(&job_id, &mut |job| {
                    job.state = JobState::Completed {
                        output_path: output_path.clone(),
                        completed_at: Utc::now(),
                    };
                    Ok(())
                })?;
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&[label, "completed"])
                    .inc();
                info!(
                    "Conversion {} completed in {} ms: {}",
                    job_id,
                    start.elapsed().as_millis(),
                    output_path.display()
                );
                Ok(job)
            }
            Err(err) => {
                let result = match err {
                    ConversionError::UnsupportedConversion { .. } => "unsupported",
                    _ => "failed",
                };
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&[label, result])
                    .inc();
                warn!("Conversion {} failed: {}", job_id, err);
                self.record_failure(&job_id, &err)?;
                Err(err)
            }
        }
    }

    /// Persists `failed` with the error detail.
    fn record_failure(&self, id: &str, err: &ConversionError) -> Result<ConversionJob, ConversionError> {
        let message = err.to_string();
        let kind = err.failure_kind();
        Ok(self.store.update(id, &mut |job| {
            job.state = JobState::Failed {
                error: message.clone(),
                kind,
                failed_at: Utc::now(),
            };
            Ok(())
        })?)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Original stem plus the target extension.
pub(crate) fn download_filename(job: &ConversionJob) -> String {
    let stem = std::path::Path::new(&job.original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "converted".to_string());
    let extension = job
        .output_path()
        .and_then(|p| p.extension())
        .map(|e| e.to_string_lossy().to_string())
        .or_else(|| job.target_format.clone())
        .unwrap_or_default();
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}
