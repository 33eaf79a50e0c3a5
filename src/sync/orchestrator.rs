//! # Integration Sync Orchestrator
//!
//! Runs one sync cycle per due integration, composing admission control,
//! the shared retry executor, and provider health reporting. A registry
//! keyed by integration id guarantees at most one live cycle per
//! integration; overlapping requests observe `AlreadyRunning` instead of
//! double-syncing.
//!
//! Every cycle persists a [`SyncMetric`]; terminal failures raise a
//! [`SyncAlert`] and flip the integration to `error` status.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{EngineError, Result};
use crate::models::{AlertSeverity, Integration, IntegrationStatus, SyncAlert, SyncMetric};
use crate::resilience::provider_health::ProviderHealthTracker;
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::{RetryExecutor, RetryPolicy};
use crate::sync::credentials::CredentialStore;

/// What one provider sync accomplished
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub items_synced: i64,
}

/// Provider sync failure
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SyncError(pub String);

/// External collaborator performing the actual provider synchronization
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(
        &self,
        integration: &Integration,
        credentials: Option<&[u8]>,
    ) -> std::result::Result<SyncReport, SyncError>;
}

/// Outcome of one requested sync cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCycleOutcome {
    Completed { items_synced: i64 },
    /// Admission denied; retry after the reported delay. Not a failure.
    RateLimited { retry_after_seconds: u64 },
    /// Another cycle for this integration is in flight.
    AlreadyRunning,
    /// Integration inactive or manual-only.
    Skipped,
    /// Retry budget exhausted; alert raised.
    Failed { error: String },
}

/// Per-integration sync coordination
pub struct SyncOrchestrator {
    pool: SqlitePool,
    rate_limiter: Arc<RateLimiter>,
    health: Arc<ProviderHealthTracker>,
    credentials: Arc<dyn CredentialStore>,
    handler: Arc<dyn SyncHandler>,
    executor: RetryExecutor,
    retry: RetryPolicy,
    /// Live-cycle registry; one entry per integration currently syncing
    active: DashMap<Uuid, ()>,
}

impl SyncOrchestrator {
    pub fn new(
        pool: SqlitePool,
        rate_limiter: Arc<RateLimiter>,
        health: Arc<ProviderHealthTracker>,
        credentials: Arc<dyn CredentialStore>,
        handler: Arc<dyn SyncHandler>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            pool,
            rate_limiter,
            health,
            credentials,
            handler,
            executor: RetryExecutor::new(),
            retry: RetryPolicy::from(&config.retry),
            active: DashMap::new(),
        }
    }

    /// Scan all active integrations and sync the ones that are due.
    /// Returns how many cycles completed successfully.
    #[instrument(skip(self))]
    pub async fn run_scan(&self) -> Result<u32> {
        let now = Utc::now();
        let integrations = Integration::all_active(&self.pool).await?;
        let mut completed = 0;

        for integration in integrations {
            if !integration.sync_due(now) {
                continue;
            }
            match self.sync_integration(integration.id).await {
                Ok(SyncCycleOutcome::Completed { .. }) => completed += 1,
                Ok(outcome) => debug!(integration_id = %integration.id, ?outcome, "sync not run"),
                Err(e) => {
                    // Per-item isolation.
                    error!(integration_id = %integration.id, error = %e, "sync cycle errored");
                }
            }
        }

        Ok(completed)
    }

    /// Run one sync cycle for an integration.
    #[instrument(skip(self))]
    pub async fn sync_integration(&self, integration_id: Uuid) -> Result<SyncCycleOutcome> {
        // Single-loop guard; released by `_guard` on every exit path.
        let _guard = match self.try_acquire(integration_id) {
            Some(guard) => guard,
            None => {
                debug!(integration_id = %integration_id, "sync already in flight");
                return Ok(SyncCycleOutcome::AlreadyRunning);
            }
        };

        let integration = Integration::find_by_id(&self.pool, integration_id)
            .await?
            .ok_or_else(|| EngineError::Sync(format!("integration {integration_id} not found")))?;

        if !integration.is_active {
            return Ok(SyncCycleOutcome::Skipped);
        }

        let decision = self
            .rate_limiter
            .check_and_consume(&integration_id.to_string(), "data_sync");
        if !decision.allowed {
            // Structured capacity signal, not a failed attempt.
            return Ok(SyncCycleOutcome::RateLimited {
                retry_after_seconds: decision.retry_after_seconds(),
            });
        }

        Integration::set_status(&self.pool, integration_id, IntegrationStatus::Syncing).await?;

        let credentials = match &integration.encrypted_credentials {
            Some(blob) => match self.credentials.decrypt(blob) {
                Ok(plaintext) => Some(plaintext),
                Err(e) => {
                    let message = format!("credential decrypt failed: {e}");
                    self.record_failed_cycle(&integration, Utc::now(), 0, &message)
                        .await?;
                    return Ok(SyncCycleOutcome::Failed { error: message });
                }
            },
            None => None,
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        let provider_key = integration.platform.as_str();

        let handler = &self.handler;
        let health = &self.health;
        let integration_ref = &integration;
        let credentials_ref = credentials.as_deref();

        let result = self
            .executor
            .execute("integration_sync", &self.retry, move |_attempt| async move {
                let outcome = handler.sync(integration_ref, credentials_ref).await;
                health.report_outcome(provider_key, outcome.is_ok());
                outcome
            })
            .await;

        let duration_ms = clock.elapsed().as_millis() as i64;

        match result {
            Ok(report) => {
                SyncMetric::record(
                    &self.pool,
                    integration_id,
                    started_at,
                    duration_ms,
                    report.items_synced,
                    true,
                    None,
                )
                .await?;
                Integration::record_sync_success(&self.pool, integration_id).await?;
                info!(
                    integration_id = %integration_id,
                    items_synced = report.items_synced,
                    duration_ms,
                    "integration synced"
                );
                Ok(SyncCycleOutcome::Completed {
                    items_synced: report.items_synced,
                })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    integration_id = %integration_id,
                    error = %message,
                    "sync exhausted retries"
                );
                self.record_failed_cycle(&integration, started_at, duration_ms, &message)
                    .await?;
                Ok(SyncCycleOutcome::Failed { error: message })
            }
        }
    }

    async fn record_failed_cycle(
        &self,
        integration: &Integration,
        started_at: chrono::DateTime<Utc>,
        duration_ms: i64,
        message: &str,
    ) -> Result<()> {
        SyncMetric::record(
            &self.pool,
            integration.id,
            started_at,
            duration_ms,
            0,
            false,
            Some(message),
        )
        .await?;
        SyncAlert::raise(
            &self.pool,
            Some(integration.id),
            None,
            AlertSeverity::Critical,
            &format!("sync for {} failed: {message}", integration.platform),
        )
        .await?;
        Integration::set_status(&self.pool, integration.id, IntegrationStatus::Error).await?;
        Ok(())
    }

    fn try_acquire(&self, integration_id: Uuid) -> Option<ActiveGuard<'_>> {
        match self.active.entry(integration_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(ActiveGuard {
                    registry: &self.active,
                    integration_id,
                })
            }
        }
    }
}

/// Removes the registry entry when a cycle ends, however it ends.
struct ActiveGuard<'a> {
    registry: &'a DashMap<Uuid, ()>,
    integration_id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.integration_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderHealthConfig, RateLimitConfig};
    use crate::database::connect_in_memory;
    use crate::models::{NewIntegration, Platform, SyncFrequency};
    use crate::sync::credentials::PlaintextCredentialStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    struct StubHandler {
        fail: bool,
        calls: AtomicU32,
        hold: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SyncHandler for StubHandler {
        async fn sync(
            &self,
            _integration: &Integration,
            _credentials: Option<&[u8]>,
        ) -> std::result::Result<SyncReport, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            if self.fail {
                Err(SyncError("provider unavailable".into()))
            } else {
                Ok(SyncReport { items_synced: 7 })
            }
        }
    }

    fn orchestrator(pool: SqlitePool, handler: Arc<StubHandler>) -> SyncOrchestrator {
        let config = SyncConfig {
            retry: crate::config::BackoffSettings {
                max_attempts: 2,
                initial_delay_ms: 1,
                ..Default::default()
            },
            ..SyncConfig::default()
        };
        SyncOrchestrator::new(
            pool,
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            Arc::new(ProviderHealthTracker::new(&ProviderHealthConfig::default())),
            Arc::new(PlaintextCredentialStore),
            handler,
            &config,
        )
    }

    async fn integration(pool: &SqlitePool) -> Integration {
        Integration::create(
            pool,
            NewIntegration {
                user_id: "user-1".to_string(),
                platform: Platform::Twitter,
                encrypted_credentials: Some(b"creds".to_vec()),
                sync_frequency: SyncFrequency::Hourly,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_cycle_records_metric_and_last_sync() {
        let pool = connect_in_memory().await.unwrap();
        let handler = Arc::new(StubHandler {
            fail: false,
            calls: AtomicU32::new(0),
            hold: None,
        });
        let orchestrator = orchestrator(pool.clone(), handler);
        let integration = integration(&pool).await;

        let outcome = orchestrator.sync_integration(integration.id).await.unwrap();
        assert_eq!(outcome, SyncCycleOutcome::Completed { items_synced: 7 });

        let fresh = Integration::find_by_id(&pool, integration.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.status, IntegrationStatus::Connected);
        assert!(fresh.last_sync.is_some());

        let metrics = SyncMetric::for_integration(&pool, integration.id, 10)
            .await
            .unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].success);
        assert_eq!(metrics[0].items_synced, 7);
    }

    #[tokio::test]
    async fn test_exhausted_retries_alert_and_flip_to_error() {
        let pool = connect_in_memory().await.unwrap();
        let handler = Arc::new(StubHandler {
            fail: true,
            calls: AtomicU32::new(0),
            hold: None,
        });
        let orchestrator = orchestrator(pool.clone(), handler.clone());
        let integration = integration(&pool).await;

        let outcome = orchestrator.sync_integration(integration.id).await.unwrap();
        assert!(matches!(outcome, SyncCycleOutcome::Failed { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2, "retry budget of 2");

        let fresh = Integration::find_by_id(&pool, integration.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.status, IntegrationStatus::Error);
        assert_eq!(SyncAlert::open_count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cycle_for_same_integration_is_refused() {
        let pool = connect_in_memory().await.unwrap();
        let hold = Arc::new(Notify::new());
        let handler = Arc::new(StubHandler {
            fail: false,
            calls: AtomicU32::new(0),
            hold: Some(hold.clone()),
        });
        let orchestrator = Arc::new(orchestrator(pool.clone(), handler));
        let integration = integration(&pool).await;

        let background = {
            let orchestrator = orchestrator.clone();
            let id = integration.id;
            tokio::spawn(async move { orchestrator.sync_integration(id).await })
        };

        // Give the first cycle time to reach the handler and park.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let overlapping = orchestrator.sync_integration(integration.id).await.unwrap();
        assert_eq!(overlapping, SyncCycleOutcome::AlreadyRunning);

        hold.notify_one();
        let first = background.await.unwrap().unwrap();
        assert_eq!(first, SyncCycleOutcome::Completed { items_synced: 7 });
    }

    #[tokio::test]
    async fn test_rate_limit_denial_is_not_a_failure() {
        let pool = connect_in_memory().await.unwrap();
        let handler = Arc::new(StubHandler {
            fail: false,
            calls: AtomicU32::new(0),
            hold: None,
        });
        let config = SyncConfig::default();
        let orchestrator = SyncOrchestrator::new(
            pool.clone(),
            Arc::new(RateLimiter::new(RateLimitConfig {
                data_sync: 1,
                ..RateLimitConfig::default()
            })),
            Arc::new(ProviderHealthTracker::default()),
            Arc::new(PlaintextCredentialStore),
            handler.clone(),
            &config,
        );
        let integration = integration(&pool).await;

        let first = orchestrator.sync_integration(integration.id).await.unwrap();
        assert!(matches!(first, SyncCycleOutcome::Completed { .. }));

        let second = orchestrator.sync_integration(integration.id).await.unwrap();
        assert!(matches!(second, SyncCycleOutcome::RateLimited { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(SyncAlert::open_count(&pool).await.unwrap(), 0);
    }
}
