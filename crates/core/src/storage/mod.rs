//! Upload and output directories.
//!
//! Uploads are streamed to disk under a collision-resistant name and checked
//! against the size limit while they are written. Conversion outputs go into a
//! separate directory; both are reaped by the retention sweeper.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::job::ConversionJob;

/// Longest stem kept from a client-supplied filename.
const MAX_STEM_LEN: usize = 100;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Errors that can occur while storing or removing files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The upload grew past the configured limit.
    #[error("File exceeds maximum allowed size of {limit_bytes} bytes")]
    SizeExceeded { limit_bytes: u64 },

    /// Failed to create a storage directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully written upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// Name the client sent.
    pub original_filename: String,
    /// Name on disk.
    pub stored_filename: String,
    /// Lowercased extension without the dot.
    pub source_format: String,
    /// Full path on disk.
    pub path: PathBuf,
    /// Bytes written.
    pub size_bytes: u64,
}

/// Streams one upload to disk, enforcing the size limit.
///
/// Dropping the writer without calling [`UploadWriter::finish`] leaves the
/// partial file behind; call [`UploadWriter::abort`] to remove it.
#[derive(Debug)]
pub struct UploadWriter {
    file: Option<File>,
    path: PathBuf,
    original_filename: String,
    stored_filename: String,
    source_format: String,
    written: u64,
    max_bytes: u64,
}

impl UploadWriter {
    /// Appends a chunk. Fails with `SizeExceeded` (and removes the partial
    /// file) as soon as the running total passes the limit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let Some(file) = self.file.as_mut() else {
            return Err(StorageError::SizeExceeded {
                limit_bytes: self.max_bytes,
            });
        };

        let total = self.written + chunk.len() as u64;
        if total > self.max_bytes {
            self.file = None;
            remove_if_exists(&self.path).await?;
            return Err(StorageError::SizeExceeded {
                limit_bytes: self.max_bytes,
            });
        }

        file.write_all(chunk).await?;
        self.written = total;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path the upload is being written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the file and returns the stored upload.
    pub async fn finish(mut self) -> Result<StoredUpload, StorageError> {
        let Some(mut file) = self.file.take() else {
            return Err(StorageError::SizeExceeded {
                limit_bytes: self.max_bytes,
            });
        };
        file.flush().await?;
        file.sync_all().await?;

        debug!(
            "Stored upload {} as {} ({} bytes)",
            self.original_filename, self.stored_filename, self.written
        );

        Ok(StoredUpload {
            original_filename: self.original_filename,
            stored_filename: self.stored_filename,
            source_format: self.source_format,
            path: self.path,
            size_bytes: self.written,
        })
    }

    /// Discards the partial upload.
    pub async fn abort(mut self) {
        self.file = None;
        if let Err(e) = remove_if_exists(&self.path).await {
            warn!("Failed to remove partial upload {}: {}", self.path.display(), e);
        }
    }
}

/// Paths and file operations for the upload and output directories.
#[derive(Debug, Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl FileStorage {
    /// Creates a storage rooted at the two directories.
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Directory holding uploads.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Directory holding conversion outputs.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Creates both directories if missing.
    pub async fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [&self.upload_dir, &self.output_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::DirectoryCreationFailed {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Lowercased extension of a filename without the dot, empty if none.
    pub fn source_format(original: &str) -> String {
        Path::new(original)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Reduces a client-supplied stem to `[A-Za-z0-9._-]`, with no leading or
    /// trailing dots, so it cannot name a parent directory on any platform.
    pub fn sanitize_stem(stem: &str) -> String {
        let mut stem = UNSAFE_CHARS
            .replace_all(stem, "_")
            .trim_matches(|c| c == '_' || c == '.')
            .to_string();
        if stem.is_empty() {
            stem = "file".to_string();
        }
        if stem.len() > MAX_STEM_LEN {
            let mut end = MAX_STEM_LEN;
            while !stem.is_char_boundary(end) {
                end -= 1;
            }
            stem.truncate(end);
        }
        stem
    }

    /// Unique on-disk name: sanitized stem, `_`, 8 hex chars, lowercased extension.
    pub fn stored_filename(original: &str) -> String {
        let base = Path::new(original)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = Path::new(&base);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let stem = Self::sanitize_stem(&stem);

        let unique = &uuid::Uuid::new_v4().simple().to_string()[..8];
        let ext = Self::source_format(&base);
        if ext.is_empty() {
            format!("{}_{}", stem, unique)
        } else {
            format!("{}_{}.{}", stem, unique, ext)
        }
    }

    /// Path of a stored upload.
    pub fn upload_path(&self, stored_filename: &str) -> PathBuf {
        self.upload_dir.join(stored_filename)
    }

    /// Where the output for `stored_filename` converted to `extension` goes.
    pub fn output_path(&self, stored_filename: &str, extension: &str) -> PathBuf {
        let stem = Path::new(stored_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| stored_filename.to_string());
        self.output_dir.join(format!("{}.{}", stem, extension))
    }

    /// Opens a writer for a new upload under a fresh stored name.
    pub async fn begin_upload(
        &self,
        original_filename: &str,
        max_bytes: u64,
    ) -> Result<UploadWriter, StorageError> {
        fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|source| StorageError::DirectoryCreationFailed {
                path: self.upload_dir.clone(),
                source,
            })?;

        let stored_filename = Self::stored_filename(original_filename);
        let path = self.upload_path(&stored_filename);
        let file = File::create(&path).await?;

        Ok(UploadWriter {
            file: Some(file),
            path,
            original_filename: original_filename.to_string(),
            stored_filename,
            source_format: Self::source_format(original_filename),
            written: 0,
            max_bytes,
        })
    }

    /// Removes the upload and output files of a job. Missing files are ignored.
    /// Returns how many files were removed.
    pub async fn remove_job_files(&self, job: &ConversionJob) -> Result<usize, StorageError> {
        let mut removed = 0;
        if remove_if_exists(&self.upload_path(&job.stored_filename)).await? {
            removed += 1;
        }
        if let Some(output) = job.output_path() {
            if remove_if_exists(output).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Removes a file, treating "already gone" as success. Returns whether a file was removed.
pub async fn remove_if_exists(path: &Path) -> Result<bool, std::io::Error> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use chrono::Utc;

    fn storage(dir: &Path) -> FileStorage {
        FileStorage::new(dir.join("uploads"), dir.join("outputs"))
    }

    #[test]
    fn test_source_format() {
        assert_eq!(FileStorage::source_format("Photo.PNG"), "png");
        assert_eq!(FileStorage::source_format("archive.tar.gz"), "gz");
        assert_eq!(FileStorage::source_format("README"), "");
    }

    #[test]
    fn test_stored_filename_shape() {
        let name = FileStorage::stored_filename("My Holiday Photo.JPG");
        let re = Regex::new(r"^My_Holiday_Photo_[0-9a-f]{8}\.jpg$").unwrap();
        assert!(re.is_match(&name), "{}", name);

        assert_ne!(
            FileStorage::stored_filename("a.png"),
            FileStorage::stored_filename("a.png")
        );
    }

    #[test]
    fn test_stored_filename_strips_paths() {
        let name = FileStorage::stored_filename("../../etc/passwd");
        assert!(name.starts_with("passwd_"));
        assert!(!name.contains('/'));

        let name = FileStorage::stored_filename("...");
        assert!(name.starts_with("file_"));
    }

    #[test]
    fn test_sanitize_stem_drops_separators() {
        assert_eq!(FileStorage::sanitize_stem("..\\..\\evil"), "evil");
        assert_eq!(FileStorage::sanitize_stem("../../etc/passwd"), "etc_passwd");
        assert_eq!(FileStorage::sanitize_stem("Quarterly Report"), "Quarterly_Report");
        assert_eq!(FileStorage::sanitize_stem(".."), "file");
    }

    #[test]
    fn test_output_path() {
        let storage = FileStorage::new("/up", "/out");
        assert_eq!(
            storage.output_path("photo_1a2b3c4d.png", "pdf"),
            PathBuf::from("/out/photo_1a2b3c4d.pdf")
        );
    }

    #[tokio::test]
    async fn test_upload_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let mut writer = storage.begin_upload("notes.TXT", 10).await.unwrap();
        writer.write_chunk(b"hello").await.unwrap();
        writer.write_chunk(b"world").await.unwrap();
        let stored = writer.finish().await.unwrap();

        assert_eq!(stored.size_bytes, 10);
        assert_eq!(stored.source_format, "txt");
        assert_eq!(stored.original_filename, "notes.TXT");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"helloworld");
        assert!(stored.path.starts_with(storage.upload_dir()));
    }

    #[tokio::test]
    async fn test_upload_over_limit_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let mut writer = storage.begin_upload("big.bin", 8).await.unwrap();
        let path = writer.path().to_path_buf();
        writer.write_chunk(b"12345").await.unwrap();
        let err = writer.write_chunk(b"6789").await.unwrap_err();

        assert!(matches!(err, StorageError::SizeExceeded { limit_bytes: 8 }));
        assert!(!path.exists());
        assert!(writer.finish().await.is_err());
    }

    #[tokio::test]
    async fn test_abort_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let mut writer = storage.begin_upload("a.png", 100).await.unwrap();
        writer.write_chunk(b"png").await.unwrap();
        let path = writer.path().to_path_buf();
        writer.abort().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_job_files_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        storage.ensure_dirs().await.unwrap();

        std::fs::write(storage.upload_path("a_00000000.png"), b"png").unwrap();
        let output = storage.output_path("a_00000000.png", "pdf");
        std::fs::write(&output, b"pdf").unwrap();

        let now = Utc::now();
        let job = ConversionJob {
            id: "job".to_string(),
            original_filename: "a.png".to_string(),
            stored_filename: "a_00000000.png".to_string(),
            source_format: "png".to_string(),
            target_format: Some("pdf".to_string()),
            file_size_bytes: 3,
            state: JobState::Completed {
                output_path: output.clone(),
                completed_at: now,
            },
            originator: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(storage.remove_job_files(&job).await.unwrap(), 2);
        assert!(!output.exists());
        assert_eq!(storage.remove_job_files(&job).await.unwrap(), 0);
    }
}
