//! # Webhook Dispatcher
//!
//! Delivers signed event payloads to subscription endpoints. A delivery
//! performs exactly one HTTP POST per attempt. Retry waits never block the
//! dispatcher: failed attempts leave a future `next_retry_at` on the row
//! and the pending sweep re-invokes them when due.
//!
//! Backoff delays come from the subscription's own retry policy through the
//! shared [`RetryPolicy`] math.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::{EngineError, Result};
use crate::models::webhook::{WebhookDelivery, WebhookSubscription};
use crate::resilience::retry::RetryPolicy;
use crate::webhook::signing::compute_signature;

pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-ID";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Outbound webhook delivery service
pub struct WebhookDispatcher {
    pool: SqlitePool,
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(pool: SqlitePool, config: WebhookConfig) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Emit an event to every active subscription registered for its kind.
    /// Returns the delivery ids created; each gets an immediate first
    /// attempt.
    #[instrument(skip(self, payload))]
    pub async fn emit(&self, event: &str, payload: &serde_json::Value) -> Result<Vec<Uuid>> {
        let subscriptions = WebhookSubscription::active_for_event(&self.pool, event).await?;
        let mut delivery_ids = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            match self.deliver(&subscription, event, payload).await {
                Ok(delivery) => delivery_ids.push(delivery.id),
                Err(e) => {
                    // Fan-out isolation: one bad endpoint never blocks the rest.
                    error!(
                        webhook_id = %subscription.id,
                        event,
                        error = %e,
                        "delivery creation failed"
                    );
                }
            }
        }

        Ok(delivery_ids)
    }

    /// Create a delivery for one subscription and run its first attempt.
    pub async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery> {
        let delivery = WebhookDelivery::create(
            &self.pool,
            subscription.id,
            event,
            payload,
            subscription.max_retries.max(1),
        )
        .await?;

        self.attempt(subscription, &delivery).await
    }

    /// Re-attempt every pending delivery whose retry time has arrived. This
    /// sweep is how retries actually execute.
    #[instrument(skip(self))]
    pub async fn process_pending_deliveries(&self) -> Result<u32> {
        let lease = ChronoDuration::seconds(self.config.attempt_lease_seconds.max(1));
        let recovered = WebhookDelivery::recover_stale(&self.pool, lease).await?;
        if recovered > 0 {
            warn!(recovered, "re-queued deliveries stuck in delivering");
        }

        let due =
            WebhookDelivery::due_pending(&self.pool, Utc::now(), self.config.sweep_batch_size)
                .await?;
        let mut attempted = 0;

        for delivery in due {
            let subscription = match WebhookSubscription::find_by_id(&self.pool, delivery.webhook_id)
                .await?
            {
                Some(s) if s.is_active => s,
                _ => {
                    debug!(delivery_id = %delivery.id, "subscription gone or inactive, skipping");
                    continue;
                }
            };

            if let Err(e) = self.attempt(&subscription, &delivery).await {
                error!(delivery_id = %delivery.id, error = %e, "sweep attempt failed");
            }
            attempted += 1;
        }

        Ok(attempted)
    }

    /// One signed HTTP POST attempt for a delivery.
    async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookDelivery> {
        if !WebhookDelivery::begin_attempt(&self.pool, delivery.id).await? {
            // Another sweep got here first; report current state.
            return self.reload(delivery.id).await;
        }

        // The row is now in `delivering`. Every exit below must write an
        // outcome, or the delivery wedges until lease recovery.
        let attempts = delivery.attempts + 1;
        let body = match serde_json::to_vec(&delivery.payload.0) {
            Ok(body) => body,
            Err(e) => {
                self.record_failure(
                    subscription,
                    delivery,
                    attempts,
                    None,
                    &format!("payload serialization failed: {e}"),
                )
                .await?;
                return self.reload(delivery.id).await;
            }
        };
        let headers = match self.build_headers(subscription, delivery, &body) {
            Ok(headers) => headers,
            Err(e) => {
                self.record_failure(subscription, delivery, attempts, None, &e.to_string())
                    .await?;
                return self.reload(delivery.id).await;
            }
        };

        let response = self
            .client
            .post(&subscription.url)
            .headers(headers)
            .timeout(subscription.timeout())
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16() as i64;
                WebhookDelivery::mark_delivered(&self.pool, delivery.id, attempts, status).await?;
                info!(
                    delivery_id = %delivery.id,
                    attempts,
                    response_status = status,
                    "webhook delivered"
                );
            }
            Ok(response) => {
                let status = response.status().as_u16() as i64;
                self.record_failure(
                    subscription,
                    delivery,
                    attempts,
                    Some(status),
                    &format!("endpoint returned HTTP {status}"),
                )
                .await?;
            }
            Err(e) => {
                // Timeouts and connection errors are the same failure class
                // as non-2xx responses.
                self.record_failure(subscription, delivery, attempts, None, &e.to_string())
                    .await?;
            }
        }

        self.reload(delivery.id).await
    }

    async fn reload(&self, id: Uuid) -> Result<WebhookDelivery> {
        WebhookDelivery::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| EngineError::Delivery(format!("delivery {id} disappeared")))
    }

    async fn record_failure(
        &self,
        subscription: &WebhookSubscription,
        delivery: &WebhookDelivery,
        attempts: i64,
        response_status: Option<i64>,
        error: &str,
    ) -> Result<()> {
        if attempts < delivery.max_attempts {
            let policy: RetryPolicy = subscription.retry_policy();
            let delay = policy.delay_for_attempt(attempts as u32);
            let next_retry_at = Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(60));

            WebhookDelivery::schedule_retry(
                &self.pool,
                delivery.id,
                attempts,
                next_retry_at,
                response_status,
                error,
            )
            .await?;

            warn!(
                delivery_id = %delivery.id,
                attempts,
                max_attempts = delivery.max_attempts,
                next_retry_at = %next_retry_at,
                error,
                "delivery failed, retry scheduled"
            );
        } else {
            WebhookDelivery::mark_failed(&self.pool, delivery.id, attempts, response_status, error)
                .await?;
            error!(
                delivery_id = %delivery.id,
                attempts,
                error,
                "delivery terminally failed"
            );
        }
        Ok(())
    }

    fn build_headers(
        &self,
        subscription: &WebhookSubscription,
        delivery: &WebhookDelivery,
        body: &[u8],
    ) -> Result<HeaderMap> {
        let signature = compute_signature(&subscription.secret, body);
        let mut headers = HeaderMap::new();

        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        );
        insert_header(&mut headers, EVENT_HEADER, &delivery.event)?;
        insert_header(&mut headers, SIGNATURE_HEADER, &signature)?;
        insert_header(&mut headers, DELIVERY_ID_HEADER, &delivery.id.to_string())?;
        insert_header(
            &mut headers,
            TIMESTAMP_HEADER,
            &Utc::now().timestamp_millis().to_string(),
        )?;

        for (name, value) in subscription.static_headers.iter() {
            insert_header(&mut headers, name, value)?;
        }

        Ok(headers)
    }

}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_str(name)
        .map_err(|e| EngineError::Delivery(format!("invalid header name {name:?}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| EngineError::Delivery(format!("invalid header value for {name:?}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}
