//! Retry with exponential backoff
//!
//! Runs an async task until it succeeds, the error is classified as not
//! retryable, or the attempt and total-wait budgets run out.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RetryWithBackoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_total_wait: Duration,
}

impl Default for RetryWithBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_total_wait: Duration::from_secs(20),
        }
    }
}

impl RetryWithBackoff {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        max_total_wait: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
            max_total_wait,
        }
    }

    /// Delay following `delay`, capped at `max_delay`
    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier).min(self.max_delay)
    }

    /// Execute `task` with retries.
    ///
    /// * `should_retry` decides whether an error is worth another attempt;
    ///   a `false` returns the error at once without invoking callbacks.
    /// * `on_retry` gets the 1-based number of the failed attempt.
    /// * `on_exhausted` runs once when the budget is spent.
    pub async fn execute<T, E, F, Fut, R, OnRetry, OnExhausted>(
        &self,
        mut task: F,
        should_retry: R,
        mut on_retry: OnRetry,
        mut on_exhausted: OnExhausted,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        OnRetry: FnMut(u32, &E),
        OnExhausted: FnMut(&E),
        E: Display,
    {
        let mut attempt: u32 = 1;
        let mut delay = self.initial_delay;
        let mut waited = Duration::ZERO;

        loop {
            let err = match task().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= self.max_attempts || waited >= self.max_total_wait {
                on_exhausted(&err);
                error!(
                    attempts = attempt,
                    waited_ms = waited.as_millis() as u64,
                    "Retry budget exhausted: {}",
                    err
                );
                return Err(err);
            }

            if !should_retry(&err) {
                return Err(err);
            }

            on_retry(attempt, &err);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying: {}",
                err
            );

            tokio::time::sleep(delay).await;
            waited += delay;
            delay = self.next_delay(delay);
            attempt += 1;
        }
    }
}
