//! Format registry: which format tokens exist, which category each belongs to,
//! and which source → target conversions are legal.
//!
//! The registry is pure data. Every conversion attempt consults
//! [`FormatRegistry::validate_conversion`] before anything touches the disk.

mod error;
mod registry;

pub use error::FormatError;
pub use registry::{normalize_format, Category, FormatRegistry};
