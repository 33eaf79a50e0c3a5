//! # Syndicate Core
//!
//! Reliable delivery and scheduling engine for cross-platform content
//! syndication: durable idempotent post jobs, a claim-based dispatch loop,
//! shared retry/backoff, sliding-window rate limiting, provider health
//! tracking with fallback routing, signed webhook delivery, and periodic
//! integration sync.
//!
//! ## Architecture
//!
//! - **[`models`]**: sqlx-backed persistence for jobs, webhook
//!   subscriptions/deliveries, integrations, and sync telemetry. All state
//!   transitions are conditional updates, so concurrent workers race safely.
//! - **[`resilience`]**: the shared primitives every outbound path
//!   composes: [`resilience::RetryPolicy`], [`resilience::RateLimiter`],
//!   [`resilience::ProviderHealthTracker`].
//! - **[`scheduler`]**: idempotent job creation and the dispatch loop.
//! - **[`webhook`]**: HMAC-signed delivery with a pending-retry sweep.
//! - **[`sync`]**: per-integration sync cycles with single-flight
//!   admission.
//! - **[`providers`]**: health-aware fallback routing across
//!   interchangeable backends.
//! - **[`engine`]** / **[`supervisor`]**: one-shot assembly of the above
//!   and ownership of the background loops.
//!
//! ## Quick start
//!
//! ```no_run
//! use syndicate_core::config::EngineConfig;
//! use syndicate_core::engine::Engine;
//!
//! # async fn run() -> syndicate_core::error::Result<()> {
//! syndicate_core::logging::init_structured_logging();
//!
//! let engine = Engine::builder(EngineConfig::default()).build().await?;
//! // engine.publishers().register(Arc::new(MyTwitterPublisher));
//! let supervisor = engine.start();
//!
//! // ... serve traffic, schedule jobs through engine.scheduler() ...
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod providers;
pub mod resilience;
pub mod scheduler;
pub mod supervisor;
pub mod sync;
pub mod webhook;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use health::{HealthMonitor, HealthSnapshot};
pub use supervisor::Supervisor;
