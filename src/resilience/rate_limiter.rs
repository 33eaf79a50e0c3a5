//! # Sliding-Window Rate Limiter
//!
//! Per-`resource:operation` admission control over a trailing window
//! (60 seconds by default). A denial is a capacity signal carrying a
//! retry-after hint, not a failure; callers must not count it against a
//! retry budget.
//!
//! State is process-local and resets on restart; it exists to prevent bursts
//! within a live process's lifetime. Multi-instance deployments need a
//! shared counter behind the same surface (see DESIGN.md).

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Slots left in the window after this check
    pub remaining: u32,
    /// When denied, how long until one slot frees up
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Retry-after rounded up to whole seconds, the wire-friendly form.
    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after
            .map(|d| d.as_secs_f64().ceil() as u64)
            .unwrap_or(0)
    }
}

/// Sliding-window rate limiter keyed by `resource:operation`
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_seconds);
        Self {
            config,
            window,
            windows: DashMap::new(),
        }
    }

    /// Configured limit for an operation; unknown operations get the
    /// conservative default.
    pub fn limit_for(&self, operation: &str) -> u32 {
        match operation {
            "api_call" => self.config.api_call,
            "data_sync" => self.config.data_sync,
            "webhook" => self.config.webhook,
            "test_connection" => self.config.test_connection,
            _ => self.config.default_limit,
        }
    }

    /// Check admission for one call and consume a slot if allowed.
    pub fn check_and_consume(&self, resource_id: &str, operation: &str) -> RateLimitDecision {
        let limit = self.limit_for(operation);
        let now = Instant::now();
        let key = format!("{resource_id}:{operation}");

        let mut timestamps = self.windows.entry(key).or_default();

        // Discard everything that has slid out of the window.
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() as u32 >= limit {
            // Oldest in-window timestamp determines when a slot frees up.
            let retry_after = timestamps
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)));

            debug!(
                resource_id,
                operation,
                limit,
                retry_after_secs = retry_after.map(|d| d.as_secs_f64().ceil() as u64),
                "rate limit exceeded"
            );

            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        timestamps.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: limit - timestamps.len() as u32,
            retry_after: None,
        }
    }

    /// Drop tracking state for a resource (e.g. a deleted integration).
    pub fn forget(&self, resource_id: &str, operation: &str) {
        self.windows.remove(&format!("{resource_id}:{operation}"));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            test_connection: 5,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_request_in_window_is_denied() {
        let limiter = RateLimiter::new(test_config());

        for i in 0..5 {
            let decision = limiter.check_and_consume("integration-1", "test_connection");
            assert!(decision.allowed, "request {i} should be admitted");
            assert_eq!(decision.remaining, 4 - i);
        }

        let denied = limiter.check_and_consume("integration-1", "test_connection");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_seconds() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_roll_restores_exactly_one_slot() {
        let limiter = RateLimiter::new(test_config());

        limiter.check_and_consume("key", "test_connection");
        tokio::time::advance(Duration::from_secs(30)).await;
        for _ in 0..4 {
            limiter.check_and_consume("key", "test_connection");
        }
        assert!(!limiter.check_and_consume("key", "test_connection").allowed);

        // Roll past the first timestamp only.
        tokio::time::advance(Duration::from_secs(31)).await;
        let decision = limiter.check_and_consume("key", "test_connection");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(!limiter.check_and_consume("key", "test_connection").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_operation_uses_conservative_default() {
        let limiter = RateLimiter::new(test_config());
        assert_eq!(
            limiter.limit_for("mystery_operation"),
            test_config().default_limit
        );

        for _ in 0..test_config().default_limit {
            assert!(limiter.check_and_consume("r", "mystery_operation").allowed);
        }
        assert!(!limiter.check_and_consume("r", "mystery_operation").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_resets_a_resource_window() {
        let limiter = RateLimiter::new(test_config());
        for _ in 0..5 {
            limiter.check_and_consume("gone", "test_connection");
        }
        assert!(!limiter.check_and_consume("gone", "test_connection").allowed);

        limiter.forget("gone", "test_connection");
        assert!(limiter.check_and_consume("gone", "test_connection").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let limiter = RateLimiter::new(test_config());
        for _ in 0..5 {
            limiter.check_and_consume("a", "test_connection");
        }
        assert!(!limiter.check_and_consume("a", "test_connection").allowed);
        assert!(limiter.check_and_consume("b", "test_connection").allowed);
    }
}
