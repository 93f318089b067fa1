//! Tracker configuration types.
//!
//! `TrackerConfig` mirrors the `llmtrace.toml` file and the construction
//! options of the tracker: dispatch mode, storage circuit breaker, and
//! database location.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level tracker configuration. All fields have defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Persist records on a detached task instead of the caller's path.
    #[serde(default)]
    pub async_tracking: bool,

    /// Guard storage writes with a circuit breaker when present.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// SQLite URL for the persistent store. `None` means the default location.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Circuit breaker thresholds for the storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that open the circuit.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// How long the circuit stays open before a trial call is allowed.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes needed to close the circuit again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_max_failures() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_success_threshold() -> u32 {
    2
}

impl CircuitBreakerConfig {
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout_ms: reset_timeout.as_millis() as u64,
            success_threshold: default_success_threshold(),
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}
