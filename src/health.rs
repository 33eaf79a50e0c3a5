//! # Health Surface
//!
//! Read-only snapshot of engine state for operational checks: queue depths,
//! delivery backlogs, unhealthy providers, and open alerts. Built from cheap
//! count queries plus in-memory tracker state, suitable for a liveness or
//! readiness endpoint to serialize directly.

use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{DeliveryStatus, JobStatus, PostJob, SyncAlert, WebhookDelivery};
use crate::resilience::ProviderHealthTracker;

/// Point-in-time view of engine health
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pending_jobs: i64,
    pub processing_jobs: i64,
    pub failed_jobs: i64,
    pub pending_deliveries: i64,
    pub failed_deliveries: i64,
    pub unhealthy_providers: Vec<String>,
    pub open_alerts: i64,
}

impl HealthSnapshot {
    /// Healthy means nothing is stuck and no provider is down. Backlogs of
    /// pending work are normal and do not fail the check.
    pub fn is_healthy(&self) -> bool {
        self.unhealthy_providers.is_empty() && self.open_alerts == 0
    }
}

/// Collects [`HealthSnapshot`]s from the database and provider tracker.
#[derive(Clone)]
pub struct HealthMonitor {
    pool: SqlitePool,
    provider_health: Arc<ProviderHealthTracker>,
}

impl HealthMonitor {
    pub fn new(pool: SqlitePool, provider_health: Arc<ProviderHealthTracker>) -> Self {
        Self {
            pool,
            provider_health,
        }
    }

    pub async fn snapshot(&self) -> Result<HealthSnapshot> {
        Ok(HealthSnapshot {
            pending_jobs: PostJob::count_with_status(&self.pool, JobStatus::Pending).await?,
            processing_jobs: PostJob::count_with_status(&self.pool, JobStatus::Processing).await?,
            failed_jobs: PostJob::count_with_status(&self.pool, JobStatus::Failed).await?,
            pending_deliveries: WebhookDelivery::count_with_status(
                &self.pool,
                DeliveryStatus::Pending,
            )
            .await?,
            failed_deliveries: WebhookDelivery::count_with_status(
                &self.pool,
                DeliveryStatus::Failed,
            )
            .await?,
            unhealthy_providers: self.provider_health.unhealthy_providers(),
            open_alerts: SyncAlert::open_count(&self.pool).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::models::{NewPostJob, Platform};
    use chrono::Utc;

    #[tokio::test]
    async fn test_snapshot_reflects_queue_and_provider_state() {
        let pool = database::connect_in_memory().await.unwrap();
        let tracker = Arc::new(ProviderHealthTracker::default());
        let monitor = HealthMonitor::new(pool.clone(), tracker.clone());

        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.pending_jobs, 0);
        assert!(snapshot.is_healthy());

        PostJob::insert_ignore(
            &pool,
            NewPostJob {
                idempotency_key: "health-test-key".into(),
                user_id: "u1".into(),
                post_id: Some("p1".into()),
                platform: Platform::Twitter,
                run_at: Utc::now(),
                max_attempts: 5,
                content: "hello".into(),
                media_refs: vec![],
            },
        )
        .await
        .unwrap();
        for _ in 0..5 {
            tracker.report_outcome("twitter", false);
        }

        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.pending_jobs, 1);
        assert_eq!(snapshot.unhealthy_providers, vec!["twitter".to_string()]);
        assert!(!snapshot.is_healthy());
    }
}
