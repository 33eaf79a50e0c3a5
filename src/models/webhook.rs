//! # Webhook Models
//!
//! [`WebhookSubscription`] is a user-registered outbound notification
//! target; [`WebhookDelivery`] is one attempted delivery of one event to one
//! subscription. Deliveries form an audit trail and are never deleted by the
//! engine (callers may prune by age).
//!
//! A delivery's retry schedule lives in the row itself (`next_retry_at`);
//! the dispatcher never blocks waiting for a delay; the pending sweep picks
//! up due rows and re-attempts them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::resilience::retry::RetryPolicy;

/// Delivery status state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
}

const SUBSCRIPTION_COLUMNS: &str = "id, integration_id, url, secret, subscribed_events, \
     static_headers, is_active, max_retries, initial_delay_ms, backoff_multiplier, max_delay_ms, \
     timeout_ms, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, webhook_id, event, payload, status, attempts, max_attempts, \
     next_retry_at, delivered_at, response_status, error, created_at, updated_at";

/// A user-registered outbound notification target
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub integration_id: String,
    pub url: String,
    /// Opaque signing secret; never logged
    pub secret: String,
    pub subscribed_events: Json<Vec<String>>,
    /// User-configured headers attached to every delivery
    pub static_headers: Json<HashMap<String, String>>,
    pub is_active: bool,
    pub max_retries: i64,
    pub initial_delay_ms: i64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: i64,
    pub timeout_ms: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New subscription for registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhookSubscription {
    pub integration_id: String,
    pub url: String,
    pub secret: String,
    pub subscribed_events: Vec<String>,
    pub static_headers: HashMap<String, String>,
    pub max_retries: i64,
    pub initial_delay_ms: i64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: i64,
    pub timeout_ms: i64,
}

impl NewWebhookSubscription {
    /// Boundary validation: the URL must parse as an absolute http(s) URL
    /// and the retry budget must be non-negative.
    pub fn validate(&self) -> Result<()> {
        let parsed = reqwest::Url::parse(&self.url)
            .map_err(|e| EngineError::Validation(format!("invalid webhook url: {e}")))?;

        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(EngineError::Validation(format!(
                "webhook url must be http(s), got {}",
                parsed.scheme()
            )));
        }

        if self.max_retries < 0 {
            return Err(EngineError::Validation(
                "max_retries must be >= 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl WebhookSubscription {
    /// Register a subscription after boundary validation.
    pub async fn create(
        pool: &SqlitePool,
        new_subscription: NewWebhookSubscription,
    ) -> Result<WebhookSubscription> {
        new_subscription.validate()?;

        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO webhook_subscriptions (
                id, integration_id, url, secret, subscribed_events, static_headers,
                is_active, max_retries, initial_delay_ms, backoff_multiplier,
                max_delay_ms, timeout_ms, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );

        let subscription = sqlx::query_as::<_, WebhookSubscription>(&query)
            .bind(Uuid::new_v4())
            .bind(&new_subscription.integration_id)
            .bind(&new_subscription.url)
            .bind(&new_subscription.secret)
            .bind(Json(&new_subscription.subscribed_events))
            .bind(Json(&new_subscription.static_headers))
            .bind(new_subscription.max_retries)
            .bind(new_subscription.initial_delay_ms)
            .bind(new_subscription.backoff_multiplier)
            .bind(new_subscription.max_delay_ms)
            .bind(new_subscription.timeout_ms)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await?;

        Ok(subscription)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> std::result::Result<Option<WebhookSubscription>, sqlx::Error> {
        let query = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE id = ?");
        sqlx::query_as::<_, WebhookSubscription>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Active subscriptions that subscribe to `event`.
    pub async fn active_for_event(
        pool: &SqlitePool,
        event: &str,
    ) -> std::result::Result<Vec<WebhookSubscription>, sqlx::Error> {
        let query =
            format!("SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE is_active = 1");
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(&query)
            .fetch_all(pool)
            .await?;

        Ok(subscriptions
            .into_iter()
            .filter(|s| s.subscribed_events.iter().any(|e| e == event))
            .collect())
    }

    pub async fn deactivate(pool: &SqlitePool, id: Uuid) -> std::result::Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_subscriptions SET is_active = 0, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// The subscription's retry policy in executor form. `max_retries` is
    /// the total attempt ceiling for a delivery.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1) as u32,
            initial_delay: Duration::from_millis(self.initial_delay_ms.max(0) as u64),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms.max(0) as u64),
            jitter_enabled: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(0) as u64)
    }
}

/// One attempted delivery of one event to one subscription
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event: String,
    pub payload: Json<serde_json::Value>,
    pub status: DeliveryStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub response_status: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Create a pending delivery for an emitted event.
    pub async fn create(
        pool: &SqlitePool,
        webhook_id: Uuid,
        event: &str,
        payload: &serde_json::Value,
        max_attempts: i64,
    ) -> std::result::Result<WebhookDelivery, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO webhook_deliveries (
                id, webhook_id, event, payload, status, attempts, max_attempts,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?)
            RETURNING {DELIVERY_COLUMNS}
            "#
        );

        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(Uuid::new_v4())
            .bind(webhook_id)
            .bind(event)
            .bind(Json(payload))
            .bind(max_attempts)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> std::result::Result<Option<WebhookDelivery>, sqlx::Error> {
        let query = format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = ?");
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Pending deliveries whose retry time has arrived (or that have never
    /// been attempted), oldest first.
    pub async fn due_pending(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> std::result::Result<Vec<WebhookDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
             WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?) \
             ORDER BY created_at ASC LIMIT ?"
        );
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Claim a pending delivery for one attempt (`pending → delivering`).
    pub async fn begin_attempt(pool: &SqlitePool, id: Uuid) -> std::result::Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries SET status = 'delivering', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a 2xx outcome.
    pub async fn mark_delivered(
        pool: &SqlitePool,
        id: Uuid,
        attempts: i64,
        response_status: i64,
    ) -> std::result::Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = 'delivered', attempts = ?, response_status = ?, delivered_at = ?, \
                 next_retry_at = NULL, error = NULL, updated_at = ? \
             WHERE id = ? AND status = 'delivering'",
        )
        .bind(attempts)
        .bind(response_status)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a failed attempt with budget remaining: back to `pending` with
    /// a future `next_retry_at` for the sweep to pick up.
    pub async fn schedule_retry(
        pool: &SqlitePool,
        id: Uuid,
        attempts: i64,
        next_retry_at: DateTime<Utc>,
        response_status: Option<i64>,
        error: &str,
    ) -> std::result::Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = 'pending', attempts = ?, next_retry_at = ?, response_status = ?, \
                 error = ?, updated_at = ? \
             WHERE id = ? AND status = 'delivering'",
        )
        .bind(attempts)
        .bind(next_retry_at)
        .bind(response_status)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a terminal failure: attempts exhausted, no further
    /// `next_retry_at` updates.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: Uuid,
        attempts: i64,
        response_status: Option<i64>,
        error: &str,
    ) -> std::result::Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = 'failed', attempts = ?, next_retry_at = NULL, response_status = ?, \
                 error = ?, updated_at = ? \
             WHERE id = ? AND status = 'delivering'",
        )
        .bind(attempts)
        .bind(response_status)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Re-queue deliveries stuck in `delivering` past the attempt lease:
    /// crash recovery for dispatchers that died between the claim and the
    /// outcome write. Returns how many rows were recovered.
    pub async fn recover_stale(
        pool: &SqlitePool,
        attempt_lease: ChronoDuration,
    ) -> std::result::Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - attempt_lease;
        let result = sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = 'pending', updated_at = ? \
             WHERE status = 'delivering' AND updated_at <= ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_with_status(
        pool: &SqlitePool,
        status: DeliveryStatus,
    ) -> std::result::Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_deliveries WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}
