//! Trait definitions for the converter module.

use async_trait::async_trait;
use std::path::PathBuf;

use super::error::ConverterError;
use super::types::ConversionRequest;

/// A plugin that turns one file into another.
///
/// Implementations never see job state. They read `input_path`, write
/// `output_path` (or a path of their choosing) and return the path written.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns the name of this converter implementation.
    fn name(&self) -> &str;

    /// Converts a file according to the request.
    async fn convert(&self, request: ConversionRequest) -> Result<PathBuf, ConverterError>;

    /// Validates that the converter is properly configured and ready.
    async fn validate(&self) -> Result<(), ConverterError> {
        Ok(())
    }
}
