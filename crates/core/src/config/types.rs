use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::converter::{default_tools, OperationsConfig, ToolConfig};
use crate::formats::Category;
use crate::service::ConversionConfig;
use crate::sweeper::RetentionConfig;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// External tool per category. Declaring any table replaces the whole default set.
    #[serde(default = "default_tools")]
    pub converters: BTreeMap<Category, ToolConfig>,
    #[serde(default)]
    pub operations: OperationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            conversion: ConversionConfig::default(),
            retention: RetentionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            converters: default_tools(),
            operations: OperationsConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8000
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("transmute.db")
}

/// Where uploads and outputs live, and how large an upload may be.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl StorageConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_max_upload_mb() -> u64 {
    50
}

/// Per-client request limit over a sliding window.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_requests_per_window() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

/// CORS configuration. An empty list allows any origin.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Config view for API responses (filesystem paths and tool arguments omitted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub storage: SanitizedStorageConfig,
    pub conversion: ConversionConfig,
    pub retention: RetentionConfig,
    pub rate_limit: RateLimitConfig,
    /// Program name per category.
    pub converters: BTreeMap<Category, String>,
    pub operations: OperationsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub max_upload_mb: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            storage: SanitizedStorageConfig {
                max_upload_mb: config.storage.max_upload_mb,
            },
            conversion: config.conversion.clone(),
            retention: config.retention.clone(),
            rate_limit: config.rate_limit.clone(),
            converters: config
                .converters
                .iter()
                .map(|(category, tool)| {
                    let program = tool
                        .program
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| tool.program.display().to_string());
                    (*category, program)
                })
                .collect(),
            operations: config.operations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "transmute.db");
        assert_eq!(config.storage.max_upload_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.conversion.max_parallel, 4);
        assert_eq!(config.retention.retention_hours, 1);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.requests_per_window, 10);
        assert!(config.cors.allowed_origins.is_empty());
        assert_eq!(config.converters, default_tools());
        assert!(config.operations.checksums);
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[storage]
upload_dir = "/data/in"
output_dir = "/data/out"
max_upload_mb = 10

[retention]
retention_hours = 24

[rate_limit]
enabled = false

[cors]
allowed_origins = ["http://localhost:3000"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.upload_dir, PathBuf::from("/data/in"));
        assert_eq!(config.storage.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.retention.retention_hours, 24);
        assert!(config.retention.enabled);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.cors.allowed_origins, vec!["http://localhost:3000"]);
    }

    #[test]
    fn test_deserialize_converters_replace_defaults() {
        let toml = r#"
[converters.image]
program = "/usr/bin/convert"
args = ["{input}", "-quality", "90", "{output}"]
targets = ["jpg", "png"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.converters.len(), 1);
        let image = &config.converters[&Category::Image];
        assert_eq!(image.program, PathBuf::from("/usr/bin/convert"));
        assert!(image.handles_target("png"));
        assert!(!image.handles_target("gif"));
        assert_eq!(image.timeout_secs, 300);
    }

    #[test]
    fn test_deserialize_unknown_category_fails() {
        let toml = r#"
[converters.hologram]
program = "holo"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_sanitized_config() {
        let config = Config::default();
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.server.port, 8000);
        assert_eq!(sanitized.storage.max_upload_mb, 50);
        assert_eq!(sanitized.converters[&Category::Audio], "ffmpeg");
        assert_eq!(sanitized.converters[&Category::Document], "pandoc");

        let json = serde_json::to_value(&sanitized).unwrap();
        assert!(json.get("database").is_none());
        assert_eq!(json["converters"]["image"], "magick");
    }
}
