//! Retention sweeper configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the retention sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Enable/disable the background sweeper.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Files older than this many hours are deleted.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// How often the sweeper runs (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Also delete job records whose upload and output are both gone.
    /// Records of jobs that are processing are never pruned.
    #[serde(default)]
    pub prune_records: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_retention_hours() -> u64 {
    1
}

fn default_sweep_interval() -> u64 {
    3600 // hourly
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
            prune_records: false,
        }
    }
}

impl RetentionConfig {
    /// Age past which files are deleted.
    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    /// Delay between sweeps, at least one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
