use std::sync::Arc;
use std::time::Duration;
use transmute_core::{
    BatchCoordinator, Config, ConversionService, RetentionSweeper, SanitizedConfig,
};

use crate::api::RateLimiter;

/// Shared application state
pub struct AppState {
    config: Config,
    service: ConversionService,
    batch: BatchCoordinator,
    sweeper: Option<Arc<RetentionSweeper>>,
    rate_limiter: Option<RateLimiter>,
}

impl AppState {
    /// Builds the state. The rate limiter follows `config.rate_limit`.
    pub fn new(
        config: Config,
        service: ConversionService,
        sweeper: Option<Arc<RetentionSweeper>>,
    ) -> Self {
        let rate_limiter = config.rate_limit.enabled.then(|| {
            RateLimiter::new(
                config.rate_limit.requests_per_window,
                Duration::from_secs(config.rate_limit.window_secs),
            )
        });

        Self {
            batch: BatchCoordinator::new(service.clone()),
            config,
            service,
            sweeper,
            rate_limiter,
        }
    }

    /// Replaces the rate limiter (`None` disables limiting).
    pub fn with_rate_limiter(mut self, rate_limiter: Option<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn service(&self) -> &ConversionService {
        &self.service
    }

    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|s| s.is_running())
    }
}
