//! Static format table and the cross-category allow-list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::FormatError;

/// Closed set of format groupings used to gate conversions and route plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Document,
    Image,
    Audio,
    Video,
    Archive,
    Code,
    Design,
    Database,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 8] = [
        Category::Document,
        Category::Image,
        Category::Audio,
        Category::Video,
        Category::Archive,
        Category::Code,
        Category::Design,
        Category::Database,
    ];

    /// Returns the category as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Document => "document",
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Archive => "archive",
            Category::Code => "code",
            Category::Design => "design",
            Category::Database => "database",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DOCUMENT_FORMATS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "csv", "ppt", "pptx", "epub",
    "mobi", "azw", "html",
];

const IMAGE_FORMATS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "tiff", "tif", "bmp", "heic", "svg", "ico", "raw", "cr2",
    "nef", "arw", "gif",
];

const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "aac", "ogg", "flac", "m4a", "opus", "wma"];

const VIDEO_FORMATS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "m4v", "mpeg",
];

const ARCHIVE_FORMATS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "gzip", "bz2"];

const CODE_FORMATS: &[&str] = &["json", "xml", "yaml", "yml", "ipynb", "md", "markdown"];

const DESIGN_FORMATS: &[&str] = &["psd", "ai", "dwg", "dxf"];

const DATABASE_FORMATS: &[&str] = &["sql", "parquet", "avro"];

/// Cross-category pairs that are allowed even though the categories differ.
const ALLOWED_CROSS_CATEGORY: &[(Category, Category)] = &[
    (Category::Document, Category::Image),
    (Category::Image, Category::Document),
    (Category::Video, Category::Audio),
    (Category::Video, Category::Image),
    (Category::Audio, Category::Document),
    (Category::Document, Category::Audio),
];

/// Lowercases a format token and strips surrounding whitespace and a leading dot.
pub fn normalize_format(format: &str) -> String {
    format.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Read-only mapping of format token to category plus the cross-category allow-list.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: BTreeMap<String, Category>,
    cross_category: BTreeSet<(Category, Category)>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FormatRegistry {
    /// The built-in format table.
    pub fn standard() -> Self {
        let tables: [(Category, &[&str]); 8] = [
            (Category::Document, DOCUMENT_FORMATS),
            (Category::Image, IMAGE_FORMATS),
            (Category::Audio, AUDIO_FORMATS),
            (Category::Video, VIDEO_FORMATS),
            (Category::Archive, ARCHIVE_FORMATS),
            (Category::Code, CODE_FORMATS),
            (Category::Design, DESIGN_FORMATS),
            (Category::Database, DATABASE_FORMATS),
        ];

        let formats = tables
            .iter()
            .flat_map(|(category, tokens)| {
                tokens.iter().map(move |token| (token.to_string(), *category))
            })
            .collect();

        Self {
            formats,
            cross_category: ALLOWED_CROSS_CATEGORY.iter().copied().collect(),
        }
    }

    /// Returns the category of a format token.
    pub fn category_of(&self, format: &str) -> Result<Category, FormatError> {
        let format = normalize_format(format);
        self.formats
            .get(&format)
            .copied()
            .ok_or(FormatError::UnsupportedFormat { format })
    }

    /// Whether the format token is registered.
    pub fn is_supported(&self, format: &str) -> bool {
        self.formats.contains_key(&normalize_format(format))
    }

    /// All registered formats grouped by category.
    pub fn all_supported(&self) -> BTreeMap<Category, BTreeSet<String>> {
        let mut grouped: BTreeMap<Category, BTreeSet<String>> = BTreeMap::new();
        for (format, category) in &self.formats {
            grouped.entry(*category).or_default().insert(format.clone());
        }
        grouped
    }

    /// Whether a pair of distinct categories is in the allow-list.
    pub fn is_cross_category_allowed(&self, source: Category, target: Category) -> bool {
        self.cross_category.contains(&(source, target))
    }

    /// Decides whether `source → target` is a legal conversion.
    ///
    /// Returns the source category on success; it drives plugin routing and metrics.
    pub fn validate_conversion(&self, source: &str, target: &str) -> Result<Category, FormatError> {
        let source = normalize_format(source);
        let target = normalize_format(target);

        if source == target {
            return Err(FormatError::SameFormat { format: source });
        }

        let source_category = self.category_of(&source)?;
        let target_category = self.category_of(&target)?;

        if source_category != target_category
            && !self.is_cross_category_allowed(source_category, target_category)
        {
            return Err(FormatError::CategoryMismatch {
                source_category,
                target_category,
            });
        }

        Ok(source_category)
    }
}
