//! Converter plugins and the dispatch table that picks them.
//!
//! A plugin implements [`Converter`]: it reads one input file and writes one
//! output file, or fails. [`ConverterDispatch`] resolves which plugin handles a
//! conversion (explicit format-pair route, then source category) or a named
//! operation such as `sha256`.
//!
//! # Example
//!
//! ```ignore
//! use transmute_core::converter::{default_tools, ConverterDispatch, OperationsConfig};
//!
//! let dispatch = ConverterDispatch::from_config(&default_tools(), &OperationsConfig::default());
//! let output = dispatch.convert(request, Category::Image).await?;
//! ```

mod checksum;
mod config;
mod dispatch;
mod error;
mod tool;
mod traits;
mod types;

pub use checksum::{ChecksumConverter, CHECKSUM_OPERATIONS};
pub use config::{default_tools, OperationsConfig, ToolConfig};
pub use dispatch::{ConverterDispatch, DispatchError};
pub use error::ConverterError;
pub use tool::ToolConverter;
pub use traits::Converter;
pub use types::ConversionRequest;
