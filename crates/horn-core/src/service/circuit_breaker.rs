// Circuit Breaker pattern implementation for broker-facing calls
// Count-based sliding window: the failure rate over the last N calls decides when to open

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Name of the breaker guarding RabbitMQ processing
pub const RABBIT_CIRCUIT_BREAKER: &str = "rabbit-cb";

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, limited requests allowed to test recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate in percent at which the circuit opens
    pub failure_rate_threshold: f32,
    /// Number of most recent calls considered in the Closed state
    pub sliding_window_size: usize,
    /// Calls required in the window before the rate is evaluated
    pub minimum_number_of_calls: usize,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub wait_duration_in_open_state: Duration,
    /// Trial calls admitted in the HalfOpen state
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 50,
            minimum_number_of_calls: 50,
            wait_duration_in_open_state: Duration::from_secs(30),
            permitted_calls_in_half_open: 10,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// `true` marks a failed call
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_calls: u32,
    half_open_failures: u32,
    /// Bumped on every transition; permits of an older state are stale
    epoch: u64,
}

/// Circuit breaker for protecting broker calls
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create the RabbitMQ breaker with default configuration
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create the RabbitMQ breaker with custom configuration
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self::named(RABBIT_CIRCUIT_BREAKER, config)
    }

    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
                opened_at: None,
                half_open_admitted: 0,
                half_open_calls: 0,
                half_open_failures: 0,
                epoch: 0,
            }),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a request should be allowed
    pub fn allow_request(&self) -> bool {
        self.acquire().is_some()
    }

    /// Admit one call, returning the epoch it was admitted in
    fn acquire(&self) -> Option<u64> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Some(inner.epoch),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.config.wait_duration_in_open_state {
                    self.transition_to_half_open(&mut inner);
                    inner.half_open_admitted = 1;
                    return Some(inner.epoch);
                }
                None
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.config.permitted_calls_in_half_open {
                    inner.half_open_admitted += 1;
                    Some(inner.epoch)
                } else {
                    None
                }
            }
        }
    }

    /// Give back a HalfOpen permit whose call ended without an outcome
    fn release(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen
            && inner.epoch == epoch
            && inner.half_open_admitted > inner.half_open_calls
        {
            inner.half_open_admitted -= 1;
            tracing::debug!(breaker = %self.name, "Circuit breaker permit released");
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.record(false);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        tracing::debug!(breaker = %self.name, "Circuit breaker recorded failure");
        self.record(true);
    }

    fn record(&self, failed: bool) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(failed);
                while inner.window.len() > self.config.sliding_window_size {
                    inner.window.pop_front();
                }

                if inner.window.len() >= self.config.minimum_number_of_calls
                    && window_failure_rate(&inner.window) >= self.config.failure_rate_threshold
                {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_calls += 1;
                if failed {
                    inner.half_open_failures += 1;
                }

                if inner.half_open_calls >= self.config.permitted_calls_in_half_open {
                    let rate =
                        inner.half_open_failures as f32 * 100.0 / inner.half_open_calls as f32;
                    if rate >= self.config.failure_rate_threshold {
                        self.transition_to_open(&mut inner);
                    } else {
                        self.transition_to_closed(&mut inner);
                    }
                }
            }
            CircuitState::Open => {
                // Late outcome from a call admitted before opening
            }
        }
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failure rate in percent over the Closed-state window
    pub fn failure_rate(&self) -> f32 {
        window_failure_rate(&self.inner.lock().window)
    }

    /// Number of calls currently held in the window
    pub fn buffered_calls(&self) -> usize {
        self.inner.lock().window.len()
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    fn transition_to_open(&self, inner: &mut Inner) {
        inner.epoch += 1;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_admitted = 0;
        inner.half_open_calls = 0;
        inner.half_open_failures = 0;
        tracing::warn!(breaker = %self.name, "Circuit breaker state changed to {}", inner.state);
    }

    fn transition_to_half_open(&self, inner: &mut Inner) {
        inner.epoch += 1;
        inner.state = CircuitState::HalfOpen;
        inner.half_open_admitted = 0;
        inner.half_open_calls = 0;
        inner.half_open_failures = 0;
        tracing::warn!(breaker = %self.name, "Circuit breaker state changed to {}", inner.state);
    }

    fn transition_to_closed(&self, inner: &mut Inner) {
        inner.epoch += 1;
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.half_open_admitted = 0;
        inner.half_open_calls = 0;
        inner.half_open_failures = 0;
        tracing::warn!(breaker = %self.name, "Circuit breaker state changed to {}", inner.state);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

fn window_failure_rate(window: &VecDeque<bool>) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let failures = window.iter().filter(|failed| **failed).count();
    failures as f32 * 100.0 / window.len() as f32
}

/// Admitted call; releases its permit if dropped before an outcome is recorded
struct CallPermit<'a> {
    circuit_breaker: &'a CircuitBreaker,
    epoch: u64,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(mut self, failed: bool) {
        self.settled = true;
        if failed {
            self.circuit_breaker.record_failure();
        } else {
            self.circuit_breaker.record_success();
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.circuit_breaker.release(self.epoch);
        }
    }
}

/// Execute a fallible operation with circuit breaker protection.
///
/// Dropping the returned future mid-flight records no outcome and frees
/// the call's HalfOpen permit.
pub async fn with_circuit_breaker<F, T, E>(
    circuit_breaker: &CircuitBreaker,
    operation: F,
) -> Result<T, CircuitBreakerError<E>>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let Some(epoch) = circuit_breaker.acquire() else {
        return Err(CircuitBreakerError::CircuitOpen);
    };
    let permit = CallPermit {
        circuit_breaker,
        epoch,
        settled: false,
    };

    match operation.await {
        Ok(result) => {
            permit.settle(false);
            Ok(result)
        }
        Err(e) => {
            permit.settle(true);
            Err(CircuitBreakerError::OperationFailed(e))
        }
    }
}

/// Error type for circuit breaker operations
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open, request rejected
    CircuitOpen,
    /// The underlying operation failed
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::CircuitOpen => None,
            CircuitBreakerError::OperationFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 4,
            minimum_number_of_calls: 4,
            wait_duration_in_open_state: Duration::from_secs(30),
            permitted_calls_in_half_open: 2,
        }
    }

    fn open_breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        let cb = CircuitBreaker::with_config(config);
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.name(), RABBIT_CIRCUIT_BREAKER);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_waits_for_minimum_calls() {
        let cb = CircuitBreaker::with_config(small_config());

        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_success();
        // 3 of 4 failed
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_below_threshold_stays_closed() {
        let cb = CircuitBreaker::with_config(small_config());

        cb.record_failure();
        cb.record_success();
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_rate(), 25.0);
    }

    #[test]
    fn test_window_slides() {
        let cb = CircuitBreaker::with_config(small_config());

        cb.record_failure();
        for _ in 0..4 {
            cb.record_success();
        }
        assert_eq!(cb.buffered_calls(), 4);
        assert_eq!(cb.failure_rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_wait_then_closes() {
        let cb = open_breaker(small_config());
        assert!(!cb.allow_request());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        // Permitted trial calls are used up
        assert!(!cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.buffered_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failures_reopen() {
        let cb = open_breaker(small_config());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow_request());
        cb.record_failure();
        cb.record_success();
        // 50% failures meets the threshold
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let cb = open_breaker(small_config());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[tokio::test]
    async fn test_with_circuit_breaker_rejects_when_open() {
        let cb = open_breaker(small_config());

        let result: Result<(), CircuitBreakerError<String>> =
            with_circuit_breaker(&cb, async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_with_circuit_breaker_records_failure() {
        let cb = CircuitBreaker::with_config(small_config());

        let result: Result<(), CircuitBreakerError<String>> =
            with_circuit_breaker(&cb, async { Err("boom".to_string()) }).await;
        match result {
            Err(CircuitBreakerError::OperationFailed(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(cb.buffered_calls(), 1);
        assert_eq!(cb.failure_rate(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_releases_half_open_permit() {
        use futures::FutureExt;

        let cb = open_breaker(small_config());
        tokio::time::advance(Duration::from_secs(30)).await;

        // Both permits are taken by calls that never finish
        for _ in 0..2 {
            let call = with_circuit_breaker(&cb, std::future::pending::<Result<(), String>>());
            assert!(call.now_or_never().is_none());
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let result: Result<(), CircuitBreakerError<String>> =
            with_circuit_breaker(&cb, async { Ok(()) }).await;
        assert!(result.is_ok());
        let result: Result<(), CircuitBreakerError<String>> =
            with_circuit_breaker(&cb, async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_permit_does_not_touch_new_half_open() {
        let cb = open_breaker(small_config());
        tokio::time::advance(Duration::from_secs(30)).await;

        let epoch = cb.acquire().unwrap();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow_request());
        cb.release(epoch);
        assert!(cb.allow_request());
        // Stale release gave nothing back, the budget of two is spent
        assert!(!cb.allow_request());
    }
}
