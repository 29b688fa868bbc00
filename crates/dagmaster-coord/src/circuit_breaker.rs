use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Closed/open/half-open state of a `CircuitBreaker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (in `Closed`, or any failure in `HalfOpen`) that trip the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays `Open` before allowing a probe in `HalfOpen`.
    pub recovery_timeout: Duration,
    /// Consecutive successes in `HalfOpen` needed to return to `Closed`.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Generic closed/open/half-open circuit breaker, shared by the store-health
/// prober and the coordination client: both depend on an external system
/// this crate does not own, and both want the same "stop hammering a
/// failing dependency, then cautiously probe it again" behavior.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    opened_at_millis: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call should be attempted right now. Transitions `Open` ->
    /// `HalfOpen` when the recovery timeout has elapsed.
    pub async fn should_allow(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::SeqCst);
                let elapsed = Duration::from_millis(self.epoch.elapsed().as_millis() as u64 - opened_at);
                if elapsed >= self.config.recovery_timeout {
                    *state = CircuitState::HalfOpen;
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        match *state {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        match *state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip(&mut state);
                }
            }
            CircuitState::HalfOpen => self.trip(&mut state),
            CircuitState::Open => {}
        }
    }

    fn trip(&self, state: &mut CircuitState) {
        *state = CircuitState::Open;
        self.opened_at_millis
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.lock().await
    }

    pub fn is_healthy_sync(&self) -> bool {
        self.consecutive_failures.load(Ordering::SeqCst) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: recovery,
                success_threshold,
            },
        )
    }

    #[tokio::test]
    async fn starts_closed_and_allows_calls() {
        let breaker = breaker(3, 2, Duration::from_secs(60));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.should_allow().await);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = breaker(3, 2, Duration::from_secs(60));
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.should_allow().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let breaker = breaker(3, 2, Duration::from_secs(60));
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        assert!(breaker.is_healthy_sync());
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = breaker(1, 2, Duration::from_millis(0));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(breaker.should_allow().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let breaker = breaker(1, 2, Duration::from_millis(0));
        breaker.record_failure().await;
        assert!(breaker.should_allow().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }
}
