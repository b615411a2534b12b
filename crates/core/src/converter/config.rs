//! Configuration for external-tool converter plugins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::formats::Category;

/// One external program that converts files of a category.
///
/// `args` is a template; these placeholders are substituted per invocation:
/// `{input}`, `{output}`, `{output_dir}`, `{source}`, `{target}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Program to run (looked up on `PATH` when relative).
    pub program: PathBuf,

    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,

    /// Target formats this tool handles. Empty means any target the registry allows.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Timeout for a single invocation in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    300
}

impl ToolConfig {
    /// Creates a tool config with the default timeout and no target restriction.
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            targets: Vec::new(),
            timeout_secs: default_timeout(),
        }
    }

    /// Restricts the tool to the given targets.
    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Whether this tool accepts the target format.
    pub fn handles_target(&self, target: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t.eq_ignore_ascii_case(target))
    }
}

/// Built-in named operations to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationsConfig {
    /// Register the `sha256` and `md5` operations.
    #[serde(default = "default_true")]
    pub checksums: bool,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self { checksums: true }
    }
}

fn default_true() -> bool {
    true
}

/// Tools wired up when the config file does not override `[converters]`.
pub fn default_tools() -> BTreeMap<Category, ToolConfig> {
    let ffmpeg = ToolConfig::new(
        "ffmpeg",
        &["-hide_banner", "-loglevel", "error", "-y", "-i", "{input}", "{output}"],
    )
    .with_timeout(3600);

    let mut tools = BTreeMap::new();
    tools.insert(Category::Audio, ffmpeg.clone());
    tools.insert(Category::Video, ffmpeg);
    tools.insert(Category::Image, ToolConfig::new("magick", &["{input}", "{output}"]));
    tools.insert(
        Category::Document,
        ToolConfig::new("pandoc", &["{input}", "-o", "{output}"]),
    );
    tools
}
