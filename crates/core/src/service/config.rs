//! Conversion lifecycle configuration.

use serde::{Deserialize, Serialize};

/// Configuration for running conversions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Wall-clock limit for one plugin invocation (seconds).
    /// An attempt that runs longer fails as a conversion failure.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum plugin invocations running at once.
    /// Further attempts wait for a free slot while their jobs stay `processing`.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_timeout() -> u64 {
    600 // 10 minutes
}

fn default_max_parallel() -> usize {
    4
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_parallel: default_max_parallel(),
        }
    }
}
