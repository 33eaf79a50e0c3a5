//! # Integration Model
//!
//! A user's connection to an external platform, plus the persisted sync
//! telemetry the orchestrator writes: per-run [`SyncMetric`] rows and
//! operator-facing [`SyncAlert`] rows.
//!
//! Credentials are stored as an opaque encrypted blob; the engine only
//! touches plaintext inside the brief decrypt-then-use window before a
//! provider call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::{Platform, SyncFrequency};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Disconnected,
    Connected,
    Syncing,
    Error,
}

/// Alert severity for operator dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

const INTEGRATION_COLUMNS: &str = "id, user_id, platform, status, encrypted_credentials, \
     sync_frequency, is_active, last_sync, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Integration {
    pub id: Uuid,
    pub user_id: String,
    pub platform: Platform,
    pub status: IntegrationStatus,
    #[serde(skip_serializing)]
    pub encrypted_credentials: Option<Vec<u8>>,
    pub sync_frequency: SyncFrequency,
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub user_id: String,
    pub platform: Platform,
    pub encrypted_credentials: Option<Vec<u8>>,
    pub sync_frequency: SyncFrequency,
}

impl Integration {
    pub async fn create(
        pool: &SqlitePool,
        new_integration: NewIntegration,
    ) -> Result<Integration, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO integrations (
                id, user_id, platform, status, encrypted_credentials, sync_frequency,
                is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, 'connected', ?, ?, 1, ?, ?)
            RETURNING {INTEGRATION_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Integration>(&query)
            .bind(Uuid::new_v4())
            .bind(&new_integration.user_id)
            .bind(new_integration.platform)
            .bind(&new_integration.encrypted_credentials)
            .bind(new_integration.sync_frequency)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = ?");
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The integration supplying credentials for a (user, platform) publish.
    pub async fn find_for_user_platform(
        pool: &SqlitePool,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations \
             WHERE user_id = ? AND platform = ? AND is_active = 1"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(user_id)
            .bind(platform)
            .fetch_optional(pool)
            .await
    }

    /// All active integrations, for the sync scan.
    pub async fn all_active(pool: &SqlitePool) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE is_active = 1");
        sqlx::query_as::<_, Integration>(&query).fetch_all(pool).await
    }

    pub async fn set_status(
        pool: &SqlitePool,
        id: Uuid,
        status: IntegrationStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE integrations SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a completed sync: status back to connected, `last_sync` stamped.
    pub async fn record_sync_success(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE integrations SET status = 'connected', last_sync = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Whether this integration is due for an automatic sync at `now`.
    pub fn sync_due(&self, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.sync_frequency.interval() else {
            return false;
        };
        match self.last_sync {
            Some(last) => now - last >= interval,
            None => true,
        }
    }
}

/// One sync run's outcome, persisted for dashboards
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncMetric {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub items_synced: i64,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncMetric {
    pub async fn record(
        pool: &SqlitePool,
        integration_id: Uuid,
        started_at: DateTime<Utc>,
        duration_ms: i64,
        items_synced: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sync_metrics \
             (id, integration_id, started_at, duration_ms, items_synced, success, error, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(integration_id)
        .bind(started_at)
        .bind(duration_ms)
        .bind(items_synced)
        .bind(success)
        .bind(error)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn for_integration(
        pool: &SqlitePool,
        integration_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SyncMetric>, sqlx::Error> {
        sqlx::query_as::<_, SyncMetric>(
            "SELECT id, integration_id, started_at, duration_ms, items_synced, success, error, \
                    created_at \
             FROM sync_metrics WHERE integration_id = ? \
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(integration_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

/// Operator-facing alert raised on terminal failures
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncAlert {
    pub id: Uuid,
    pub integration_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub severity: AlertSeverity,
    pub message: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl SyncAlert {
    pub async fn raise(
        pool: &SqlitePool,
        integration_id: Option<Uuid>,
        job_id: Option<Uuid>,
        severity: AlertSeverity,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sync_alerts (id, integration_id, job_id, severity, message, resolved, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(integration_id)
        .bind(job_id)
        .bind(severity)
        .bind(message)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn open_count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_alerts WHERE resolved = 0")
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    pub async fn resolve(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE sync_alerts SET resolved = 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
