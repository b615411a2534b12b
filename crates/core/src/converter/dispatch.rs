//! Plugin resolution for conversions and named operations.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::checksum::{ChecksumConverter, CHECKSUM_OPERATIONS};
use super::config::{OperationsConfig, ToolConfig};
use super::error::ConverterError;
use super::tool::ToolConverter;
use super::traits::Converter;
use super::types::ConversionRequest;
use crate::formats::Category;

/// Errors produced while resolving or running a plugin.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No plugin is registered for the category.
    #[error("No converter registered for {category} files")]
    NoConverter { category: Category },

    /// No plugin is registered under the operation name.
    #[error("Unknown operation: {name}")]
    UnknownOperation { name: String },

    /// The plugin ran and returned an error.
    #[error(transparent)]
    Converter(#[from] ConverterError),
}

impl DispatchError {
    /// Whether the failure means "not implemented" rather than "ran and failed".
    pub fn is_unsupported(&self) -> bool {
        match self {
            Self::NoConverter { .. } | Self::UnknownOperation { .. } => true,
            Self::Converter(e) => e.is_unsupported(),
        }
    }

    /// Human-readable detail for the job record.
    pub fn detail(&self) -> String {
        match self {
            Self::Converter(e) => e.detail(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone)]
struct OperationEntry {
    converter: Arc<dyn Converter>,
    output_extension: String,
}

/// Maps categories, explicit format pairs, and operation names to plugins.
///
/// Resolution for a conversion tries the explicit `(source, target)` route
/// first and falls back to the plugin of the source category.
#[derive(Clone, Default)]
pub struct ConverterDispatch {
    categories: BTreeMap<Category, Arc<dyn Converter>>,
    routes: HashMap<(String, String), Arc<dyn Converter>>,
    operations: BTreeMap<String, OperationEntry>,
}

impl ConverterDispatch {
    /// Creates an empty dispatch table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires one tool plugin per configured category plus the built-in operations.
    pub fn from_config(
        tools: &BTreeMap<Category, ToolConfig>,
        operations: &OperationsConfig,
    ) -> Self {
        let mut dispatch = Self::new();
        for (category, tool) in tools {
            let name = tool
                .program
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| category.to_string());
            dispatch.register_category(*category, Arc::new(ToolConverter::new(name, tool.clone())));
        }

        if operations.checksums {
            let checksum: Arc<dyn Converter> = Arc::new(ChecksumConverter::new());
            for op in CHECKSUM_OPERATIONS {
                dispatch.register_operation(*op, op.to_string(), Arc::clone(&checksum));
            }
        }
        dispatch
    }

    /// Sets the plugin for every format of a category.
    pub fn register_category(&mut self, category: Category, converter: Arc<dyn Converter>) {
        self.categories.insert(category, converter);
    }

    /// Sets the plugin for one exact format pair, overriding the category plugin.
    pub fn register_route(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        converter: Arc<dyn Converter>,
    ) {
        self.routes.insert((source.into(), target.into()), converter);
    }

    /// Registers a named operation whose result is written with `output_extension`.
    pub fn register_operation(
        &mut self,
        name: impl Into<String>,
        output_extension: impl Into<String>,
        converter: Arc<dyn Converter>,
    ) {
        self.operations.insert(
            name.into(),
            OperationEntry {
                converter,
                output_extension: output_extension.into(),
            },
        );
    }

    /// Registered categories.
    pub fn categories(&self) -> Vec<Category> {
        self.categories.keys().copied().collect()
    }

    /// Registered operation names.
    pub fn operation_names(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }

    /// Whether `name` is a registered operation.
    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// File extension used for the output of an operation.
    pub fn operation_extension(&self, name: &str) -> Option<&str> {
        self.operations
            .get(name)
            .map(|entry| entry.output_extension.as_str())
    }

    /// Picks the plugin for a conversion.
    pub fn resolve(
        &self,
        source: &str,
        target: &str,
        category: Category,
    ) -> Result<Arc<dyn Converter>, DispatchError> {
        if let Some(converter) = self.routes.get(&(source.to_string(), target.to_string())) {
            debug!("Routing {} -> {} to {} (explicit route)", source, target, converter.name());
            return Ok(Arc::clone(converter));
        }

        match self.categories.get(&category) {
            Some(converter) => {
                debug!(
                    "Routing {} -> {} to {} ({} category)",
                    source,
                    target,
                    converter.name(),
                    category
                );
                Ok(Arc::clone(converter))
            }
            None => Err(DispatchError::NoConverter { category }),
        }
    }

    /// Runs a conversion on the resolved plugin. Failures are passed through unchanged.
    pub async fn convert(
        &self,
        request: ConversionRequest,
        category: Category,
    ) -> Result<PathBuf, DispatchError> {
        let converter = self.resolve(&request.source_format, &request.target_format, category)?;
        Ok(converter.convert(request).await?)
    }

    /// Runs a named operation. `request.target_format` carries the operation name.
    pub async fn run_operation(&self, request: ConversionRequest) -> Result<PathBuf, DispatchError> {
        let entry = self.operations.get(&request.target_format).ok_or_else(|| {
            DispatchError::UnknownOperation {
                name: request.target_format.clone(),
            }
        })?;
        debug!(
            "Running operation {} on {} via {}",
            request.target_format,
            request.job_id,
            entry.converter.name()
        );
        Ok(entry.converter.convert(request).await?)
    }

    /// Probes every registered plugin, returning the failures by plugin name.
    pub async fn validate_all(&self) -> Vec<(String, ConverterError)> {
        let mut failures = Vec::new();
        for converter in self.categories.values() {
            if let Err(e) = converter.validate().await {
                failures.push((converter.name().to_string(), e));
            }
        }
        failures
    }
}
