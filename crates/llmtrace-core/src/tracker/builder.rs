//! Construction options for [`Tracker`].

use std::sync::Arc;
use std::time::Duration;

use llmtrace_types::config::{CircuitBreakerConfig, TrackerConfig};

use super::Tracker;
use crate::breaker::CircuitBreaker;
use crate::logger::{NoopLogger, TrackingLogger};
use crate::repository::BoxRequestRepository;

/// Builder returned by [`Tracker::builder`].
///
/// Defaults: synchronous dispatch, no circuit breaker, [`NoopLogger`].
pub struct TrackerBuilder {
    storage: BoxRequestRepository,
    logger: Arc<dyn TrackingLogger>,
    breaker: Option<CircuitBreaker>,
    async_tracking: bool,
}

impl TrackerBuilder {
    pub(crate) fn new(storage: BoxRequestRepository) -> Self {
        Self {
            storage,
            logger: Arc::new(NoopLogger),
            breaker: None,
            async_tracking: false,
        }
    }

    /// Where tracking failures are reported.
    pub fn logger(mut self, logger: Arc<dyn TrackingLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Save records on a spawned task instead of the caller's.
    pub fn async_tracking(mut self, enabled: bool) -> Self {
        self.async_tracking = enabled;
        self
    }

    /// Guard storage writes with a circuit breaker.
    pub fn circuit_breaker(mut self, max_failures: u32, reset_timeout: Duration) -> Self {
        self.breaker = Some(CircuitBreaker::new(max_failures, reset_timeout));
        self
    }

    pub fn circuit_breaker_config(mut self, config: &CircuitBreakerConfig) -> Self {
        self.breaker = Some(CircuitBreaker::from_config(config));
        self
    }

    /// Apply the dispatch mode and breaker settings of a loaded config.
    ///
    /// A config without a `[circuit_breaker]` table leaves any breaker set
    /// earlier on this builder in place.
    pub fn from_config(mut self, config: &TrackerConfig) -> Self {
        self.async_tracking = config.async_tracking;
        if let Some(breaker) = &config.circuit_breaker {
            self = self.circuit_breaker_config(breaker);
        }
        self
    }

    pub fn build(self) -> Tracker {
        tracing::debug!(
            async_tracking = self.async_tracking,
            circuit_breaker = self.breaker.is_some(),
            "tracker built"
        );
        Tracker {
            storage: Arc::new(self.storage),
            logger: self.logger,
            breaker: self.breaker.map(Arc::new),
            async_tracking: self.async_tracking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::tracker::tests::TestRepository;

    #[tokio::test]
    async fn test_defaults_are_sync_without_breaker() {
        let tracker = Tracker::new(TestRepository::default());
        assert!(!tracker.is_async());
        assert!(!tracker.has_circuit_breaker());
        assert_eq!(tracker.circuit_state().await, None);
    }

    #[tokio::test]
    async fn test_from_config_applies_mode_and_breaker() {
        let config: TrackerConfig = sample_config();
        let tracker = Tracker::builder(TestRepository::default())
            .from_config(&config)
            .build();

        assert!(tracker.is_async());
        assert_eq!(tracker.circuit_state().await, Some(CircuitState::Closed));
    }

    #[test]
    fn test_from_config_without_breaker_keeps_explicit_one() {
        let tracker = Tracker::builder(TestRepository::default())
            .circuit_breaker(3, Duration::from_secs(1))
            .from_config(&TrackerConfig::default())
            .build();
        assert!(tracker.has_circuit_breaker());
        assert!(!tracker.is_async());
    }

    fn sample_config() -> TrackerConfig {
        TrackerConfig {
            async_tracking: true,
            circuit_breaker: Some(CircuitBreakerConfig::new(2, Duration::from_millis(500))),
            database_url: None,
        }
    }
}
