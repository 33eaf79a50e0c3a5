//! # Retry Policy and Executor
//!
//! Exponential backoff with a maximum-delay cap and an attempts ceiling.
//! The webhook dispatcher, job dispatcher, and sync orchestrator all derive
//! their delays from [`RetryPolicy::delay_for_attempt`]: backoff math lives
//! here and nowhere else.
//!
//! Jitter is supported (to spread thundering herds) but disabled by default
//! so delay sequences stay exactly predictable.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum jitter fraction added to a delay when jitter is enabled
const MAX_JITTER: f64 = 0.1;

/// Backoff policy governing one retried operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Exponential growth factor between attempts
    pub backoff_multiplier: f64,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Randomize delays upward by up to 10%
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            jitter_enabled: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) has failed:
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter_enabled {
            let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER);
            capped_ms * (1.0 + jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Whether a failure at `attempts` (attempts performed so far) leaves
    /// budget for another try.
    pub fn has_budget(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Generic policy executor: runs an async operation under a [`RetryPolicy`],
/// sleeping between attempts and surfacing the last error once the budget is
/// exhausted.
#[derive(Debug, Default, Clone)]
pub struct RetryExecutor;

impl RetryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `operation` up to `policy.max_attempts` times. The closure
    /// receives the 1-based attempt number. The first attempt runs
    /// immediately; each failure waits the policy's computed delay before
    /// the next attempt.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        operation = name,
                        attempts = max_attempts,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }
            }
        }

        unreachable!("loop always returns within max_attempts iterations")
    }
}
