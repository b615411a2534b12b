//! Error types for the format registry.

use thiserror::Error;

use super::Category;

/// Reasons a format lookup or conversion pair is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The format token is not registered in any category.
    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    /// Source and target are the same format.
    #[error("Source and target formats are the same: {format}")]
    SameFormat { format: String },

    /// The category pair is not in the cross-category allow-list.
    #[error("Conversion from {source_category} to {target_category} is not supported")]
    CategoryMismatch {
        source_category: Category,
        target_category: Category,
    },
}

impl FormatError {
    /// Whether the error concerns an unknown format rather than an illegal pair.
    pub fn is_unknown_format(&self) -> bool {
        matches!(self, Self::UnsupportedFormat { .. })
    }
}
