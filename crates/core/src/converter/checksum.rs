//! Checksum operations: write the hex digest of the input to the output file.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use super::error::ConverterError;
use super::traits::Converter;
use super::types::ConversionRequest;

/// Operation names this plugin answers to.
pub const CHECKSUM_OPERATIONS: &[&str] = &["sha256", "md5"];

const READ_CHUNK: usize = 64 * 1024;

/// Computes a file digest. The operation name is carried in `target_format`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumConverter;

impl ChecksumConverter {
    /// Creates a new checksum converter.
    pub fn new() -> Self {
        Self
    }
}

enum Hasher {
    Sha256(Sha256),
    Md5(md5::Context),
}

impl Hasher {
    fn for_operation(operation: &str) -> Option<Self> {
        match operation {
            "sha256" => Some(Self::Sha256(Sha256::new())),
            "md5" => Some(Self::Md5(md5::Context::new())),
            _ => None,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Md5(h) => h.consume(data),
        }
    }

    fn finish_hex(self) -> String {
        match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Md5(h) => format!("{:x}", h.compute()),
        }
    }
}

#[async_trait]
impl Converter for ChecksumConverter {
    fn name(&self) -> &str {
        "checksum"
    }

    async fn convert(&self, request: ConversionRequest) -> Result<PathBuf, ConverterError> {
        let mut hasher = Hasher::for_operation(&request.target_format).ok_or_else(|| {
            ConverterError::unsupported(&request.source_format, &request.target_format)
        })?;

        let mut file = match tokio::fs::File::open(&request.input_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConverterError::InputNotFound {
                    path: request.input_path.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let digest = hasher.finish_hex();
        let file_name = request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output_path, format!("{}  {}\n", digest, file_name)).await?;

        Ok(request.output_path)
    }
}
