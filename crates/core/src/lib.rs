pub mod batch;
pub mod config;
pub mod converter;
pub mod formats;
pub mod job;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod testing;

pub use batch::{
    BatchCoordinator, BatchError, BatchStatus, BundledArchive, ConvertOutcome, ReceivedFile,
    SkipReason, SkippedEntry, StatusCounts, StatusRow, UploadOutcome, MAX_BATCH_SIZE,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, CorsConfig,
    DatabaseConfig, RateLimitConfig, SanitizedConfig, ServerConfig, StorageConfig,
};
pub use converter::{
    ChecksumConverter, ConversionRequest, Converter, ConverterDispatch, ConverterError,
    DispatchError, OperationsConfig, ToolConfig, ToolConverter,
};
pub use formats::{normalize_format, Category, FormatError, FormatRegistry};
pub use job::{
    ConversionJob, FailureKind, JobFilter, JobState, JobStatus, JobStore, JobStoreError, NewJob,
    SqliteJobStore,
};
pub use service::{
    ConversionConfig, ConversionError, ConversionService, DownloadableFile, ErrorKind,
    DEFAULT_MAX_UPLOAD_BYTES,
};
pub use storage::{remove_if_exists, FileStorage, StorageError, StoredUpload, UploadWriter};
pub use sweeper::{RetentionConfig, RetentionSweeper, SweepError, SweepReport};
