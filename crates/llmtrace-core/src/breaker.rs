//! Circuit breaker guarding the storage write path.
//!
//! Three states:
//! - **Closed**: calls run; consecutive failures are counted and the circuit
//!   opens when the count reaches `max_failures`. A single success resets it.
//! - **Open**: calls fail fast with [`CircuitError::Open`] without running.
//!   Once `reset_timeout` has elapsed since the last failure, the next state
//!   check moves the breaker to half-open (lazily, no background timer).
//! - **HalfOpen**: trial calls run. One failure reopens the circuit;
//!   `success_threshold` consecutive successes close it.
//!
//! The lock is held across the state check, the guarded operation and the
//! state update, so calls through one breaker are serialized. A guarded
//! operation must not call back into the same breaker.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use llmtrace_types::config::CircuitBreakerConfig;

/// Consecutive half-open successes needed to close the circuit by default.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Result error of a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("circuit breaker is open")]
    Open,

    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of the breaker, read under the lock.
///
/// `failure_count` is only meaningful while closed and `success_count` only
/// while half-open; both read as zero in the other states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
enum Phase {
    Closed { consecutive_failures: u32 },
    Open { last_failure: Instant },
    HalfOpen { consecutive_successes: u32 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    success_threshold: u32,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    /// Create a closed breaker. A `max_failures` of zero is treated as one.
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            reset_timeout,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            phase: Mutex::new(Phase::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.max_failures, config.reset_timeout())
            .with_success_threshold(config.success_threshold)
    }

    /// Override the half-open close threshold (minimum one).
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Run `operation` under the current policy.
    ///
    /// Returns `CircuitError::Open` without invoking `operation` while the
    /// circuit is open; otherwise the operation's own outcome.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut phase = self.phase.lock().await;
        self.refresh(&mut phase);

        if matches!(*phase, Phase::Open { .. }) {
            return Err(CircuitError::Open);
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(&mut phase),
            Err(_) => self.record_failure(&mut phase),
        }

        result.map_err(CircuitError::Inner)
    }

    /// Current state, after applying the open -> half-open timeout check.
    pub async fn state(&self) -> CircuitState {
        self.snapshot().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let mut phase = self.phase.lock().await;
        self.refresh(&mut phase);

        match *phase {
            Phase::Closed {
                consecutive_failures,
            } => BreakerSnapshot {
                state: CircuitState::Closed,
                failure_count: consecutive_failures,
                success_count: 0,
            },
            Phase::Open { .. } => BreakerSnapshot {
                state: CircuitState::Open,
                failure_count: 0,
                success_count: 0,
            },
            Phase::HalfOpen {
                consecutive_successes,
            } => BreakerSnapshot {
                state: CircuitState::HalfOpen,
                failure_count: 0,
                success_count: consecutive_successes,
            },
        }
    }

    /// Lazy open -> half-open transition.
    fn refresh(&self, phase: &mut Phase) {
        if let Phase::Open { last_failure } = phase {
            if last_failure.elapsed() > self.reset_timeout {
                tracing::info!("circuit half-open, allowing trial calls");
                *phase = Phase::HalfOpen {
                    consecutive_successes: 0,
                };
            }
        }
    }

    fn record_success(&self, phase: &mut Phase) {
        match phase {
            Phase::Closed { .. } => {
                *phase = Phase::Closed {
                    consecutive_failures: 0,
                };
            }
            Phase::HalfOpen {
                consecutive_successes,
            } => {
                let count = *consecutive_successes + 1;
                if count >= self.success_threshold {
                    tracing::info!("circuit closed after successful trial calls");
                    *phase = Phase::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    *phase = Phase::HalfOpen {
                        consecutive_successes: count,
                    };
                }
            }
            // Unreachable: calls never run while open.
            Phase::Open { .. } => {}
        }
    }

    fn record_failure(&self, phase: &mut Phase) {
        match phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                let count = *consecutive_failures + 1;
                if count >= self.max_failures {
                    tracing::warn!(failures = count, "circuit opened");
                    *phase = Phase::Open {
                        last_failure: Instant::now(),
                    };
                } else {
                    *phase = Phase::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            Phase::HalfOpen { .. } => {
                tracing::warn!("trial call failed, circuit reopened");
                *phase = Phase::Open {
                    last_failure: Instant::now(),
                };
            }
            Phase::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        breaker.call(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_new_breaker_is_closed() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn test_opens_after_exactly_max_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, CircuitState::Closed);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        fail(&breaker).await.unwrap_err();

        let invoked = AtomicBool::new(false);
        let result = breaker
            .call(|| async {
                invoked.store(true, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open)));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_operation_error_is_passed_through() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        let result = fail(&breaker).await;
        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
    }

    #[tokio::test]
    async fn test_half_open_after_reset_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        fail(&breaker).await.unwrap_err();
        assert!(breaker.is_open().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let invoked = AtomicBool::new(false);
        breaker
            .call(|| async {
                invoked.store(true, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await
            .unwrap();
        assert!(invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_guarded_call_after_timeout_runs_without_state_query() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&breaker).await.unwrap();
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.success_count, 1);
    }

    #[tokio::test]
    async fn test_two_half_open_successes_close_the_circuit() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();

        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test]
    async fn test_single_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_forgives_earlier_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.snapshot().await.failure_count, 2);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_zero_max_failures_behaves_as_one() {
        let breaker = CircuitBreaker::new(0, Duration::from_secs(30));
        assert_eq!(breaker.max_failures(), 1);
        fail(&breaker).await.unwrap_err();
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn test_configurable_success_threshold() {
        let config = CircuitBreakerConfig {
            max_failures: 1,
            reset_timeout_ms: 50,
            success_threshold: 3,
        };
        let breaker = CircuitBreaker::from_config(&config);
        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mixed_calls_keep_a_valid_state() {
        let breaker = Arc::new(CircuitBreaker::new(1_000, Duration::from_secs(30)));
        let invocations = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let breaker = Arc::clone(&breaker);
                let invocations = Arc::clone(&invocations);
                tokio::spawn(async move {
                    breaker
                        .call(|| async {
                            invocations.fetch_add(1, Ordering::SeqCst);
                            if i % 3 == 0 { Err("boom") } else { Ok(()) }
                        })
                        .await
                })
            })
            .collect();

        for result in futures_util::future::join_all(handles).await {
            assert!(result.is_ok(), "task panicked");
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 100);
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert!(snapshot.failure_count <= 34);
        assert_eq!(snapshot.success_count, 0);
    }
}
