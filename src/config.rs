//! # Engine Configuration
//!
//! Explicit, validated configuration for every subsystem of the delivery
//! engine. All values have working defaults; a TOML file and/or
//! `SYNDICATE__`-prefixed environment variables override them.
//!
//! No component reads environment variables directly; the config is built
//! once at process start and handed to the services that need it.

use crate::error::{EngineError, Result};
use crate::resilience::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure for the delivery engine
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Database connection settings
    pub database: DatabaseConfig,

    /// Job dispatch loop settings
    pub scheduler: SchedulerConfig,

    /// Webhook delivery settings
    pub webhook: WebhookConfig,

    /// Per-operation sliding-window rate limits
    pub rate_limits: RateLimitConfig,

    /// Provider health tracking and probing
    pub provider_health: ProviderHealthConfig,

    /// Integration sync orchestration
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://syndicate.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max jobs claimed per dispatch cycle
    pub batch_size: i64,
    /// Seconds between dispatch cycles
    pub poll_interval_seconds: u64,
    /// A `processing` job older than this is considered abandoned and
    /// recovered to `pending`
    pub claim_lease_seconds: i64,
    /// Hard timeout for a single platform publish call
    pub publish_timeout_seconds: u64,
    /// Backoff applied when a publish attempt fails
    pub backoff: BackoffSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval_seconds: 5,
            claim_lease_seconds: 300,
            publish_timeout_seconds: 30,
            backoff: BackoffSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Seconds between pending-delivery sweeps
    pub sweep_interval_seconds: u64,
    /// Max deliveries re-attempted per sweep
    pub sweep_batch_size: i64,
    /// Seconds a delivery may sit in `delivering` before the sweep re-queues
    /// it (crash recovery)
    pub attempt_lease_seconds: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 10,
            sweep_batch_size: 50,
            attempt_lease_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub api_call: u32,
    pub data_sync: u32,
    pub webhook: u32,
    pub test_connection: u32,
    /// Conservative limit applied to operations with no explicit entry
    pub default_limit: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api_call: 100,
            data_sync: 10,
            webhook: 1000,
            test_connection: 5,
            default_limit: 10,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderHealthConfig {
    /// Consecutive errors before a provider is flagged unhealthy
    pub unhealthy_threshold: u32,
    /// Seconds between background no-op probes
    pub probe_interval_seconds: u64,
}

impl Default for ProviderHealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 5,
            probe_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scans for integrations due to sync
    pub scan_interval_seconds: u64,
    /// Retry budget for one sync cycle's provider call
    pub retry: BackoffSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 30,
            retry: BackoffSettings {
                max_attempts: 3,
                ..BackoffSettings::default()
            },
        }
    }
}

/// Serializable mirror of [`RetryPolicy`] for config files
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_enabled: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_enabled: false,
        }
    }
}

impl From<&BackoffSettings> for RetryPolicy {
    fn from(settings: &BackoffSettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_enabled: settings.jitter_enabled,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file plus environment
    /// overrides (`SYNDICATE__SCHEDULER__BATCH_SIZE=20` style).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("SYNDICATE").separator("__"))
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| EngineError::Configuration(e.to_string()))
    }
}
