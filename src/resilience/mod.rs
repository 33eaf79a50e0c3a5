//! # Resilience Primitives
//!
//! The three leaf components every outbound call path composes:
//!
//! - [`retry`]: shared backoff policy and generic retry executor. The single
//!   source of backoff math for job dispatch, webhook delivery, and
//!   integration sync.
//! - [`rate_limiter`]: sliding-window admission control per
//!   `resource:operation` key.
//! - [`provider_health`]: consecutive-failure tracking that routes traffic
//!   away from unhealthy providers.
//!
//! Rate limiting and health tracking are deliberately best-effort: a defect
//! in either degrades to "allow"/"healthy" rather than blocking traffic.

pub mod provider_health;
pub mod rate_limiter;
pub mod retry;

pub use provider_health::{ProviderHealth, ProviderHealthTracker};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use retry::{RetryExecutor, RetryPolicy};
