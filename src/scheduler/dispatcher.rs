//! # Job Dispatcher
//!
//! The dispatch loop that owns `pending → processing → succeeded | failed`.
//! Each cycle recovers abandoned claims, selects due jobs oldest-first, and
//! processes each under per-item isolation: one misbehaving job can never
//! halt the loop for the others.
//!
//! Rate-limit admission is checked after the claim and before the outbound
//! publish; a denial releases the claim and does not consume one of the
//! job's attempts. Publish outcomes are emitted as webhook events.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::{AlertSeverity, Integration, PostJob, SyncAlert};
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::RetryPolicy;
use crate::scheduler::publisher::{PublishError, PublishOutcome, PublisherRegistry};
use crate::sync::credentials::CredentialStore;
use crate::webhook::dispatcher::WebhookDispatcher;

/// Counters for one dispatch cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Stale `processing` rows returned to `pending`
    pub recovered: u64,
    pub claimed: u32,
    pub succeeded: u32,
    /// Failed attempts re-queued with backoff
    pub rescheduled: u32,
    /// Terminal failures
    pub failed: u32,
    /// Jobs skipped this cycle on rate-limit denial
    pub rate_limited: u32,
}

/// Claim-based dispatch loop over due post jobs
pub struct JobDispatcher {
    pool: SqlitePool,
    registry: Arc<PublisherRegistry>,
    rate_limiter: Arc<RateLimiter>,
    credentials: Arc<dyn CredentialStore>,
    webhooks: Arc<WebhookDispatcher>,
    config: SchedulerConfig,
    backoff: RetryPolicy,
}

impl JobDispatcher {
    pub fn new(
        pool: SqlitePool,
        registry: Arc<PublisherRegistry>,
        rate_limiter: Arc<RateLimiter>,
        credentials: Arc<dyn CredentialStore>,
        webhooks: Arc<WebhookDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        let backoff = RetryPolicy::from(&config.backoff);
        Self {
            pool,
            registry,
            rate_limiter,
            credentials,
            webhooks,
            config,
            backoff,
        }
    }

    /// Run one dispatch cycle: recover stale claims, then claim and publish
    /// every due job up to the batch size.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();

        let lease = ChronoDuration::seconds(self.config.claim_lease_seconds);
        stats.recovered = PostJob::recover_stale(&self.pool, lease).await?;
        if stats.recovered > 0 {
            warn!(recovered = stats.recovered, "re-queued stale processing jobs");
        }

        let due = PostJob::due_pending(&self.pool, Utc::now(), self.config.batch_size).await?;
        for job in due {
            if let Err(e) = self.process_job(&job, &mut stats).await {
                // Per-item isolation: record and move on.
                error!(job_id = %job.id, error = %e, "dispatch iteration failed");
            }
        }

        if stats != DispatchStats::default() {
            debug!(?stats, "dispatch cycle complete");
        }
        Ok(stats)
    }

    async fn process_job(&self, job: &PostJob, stats: &mut DispatchStats) -> Result<()> {
        // The claim is the mutex: exactly one worker proceeds past here.
        if !PostJob::claim(&self.pool, job.id).await? {
            debug!(job_id = %job.id, "job already claimed or no longer pending");
            return Ok(());
        }

        // Admission runs after the claim so a lost claim race never burns a
        // rate-limit slot, and still before any outbound call.
        let decision = self
            .rate_limiter
            .check_and_consume(job.platform.as_str(), "api_call");
        if !decision.allowed {
            PostJob::release(&self.pool, job.id).await?;
            debug!(
                job_id = %job.id,
                platform = %job.platform,
                retry_after_secs = decision.retry_after_seconds(),
                "publish deferred by rate limit"
            );
            stats.rate_limited += 1;
            return Ok(());
        }
        stats.claimed += 1;

        match self.attempt_publish(job).await {
            Ok(outcome) => {
                PostJob::mark_succeeded(&self.pool, job.id).await?;
                stats.succeeded += 1;
                info!(job_id = %job.id, platform = %job.platform, "job published");
                self.emit_event("post.published", job, Some(&outcome), None)
                    .await;
            }
            Err(publish_error) => {
                self.record_failure(job, &publish_error, stats).await?;
            }
        }
        Ok(())
    }

    /// One publish attempt with credential resolution and the hard timeout.
    async fn attempt_publish(&self, job: &PostJob) -> std::result::Result<PublishOutcome, PublishError> {
        let publisher = self.registry.get(job.platform).ok_or_else(|| {
            PublishError::Permanent(format!("no publisher registered for {}", job.platform))
        })?;

        let credentials = self.resolve_credentials(job).await?;

        let timeout = Duration::from_secs(self.config.publish_timeout_seconds);
        let outcome = tokio::time::timeout(
            timeout,
            publisher.publish(credentials.as_deref(), &job.content, &job.media_refs),
        )
        .await
        .map_err(|_| {
            PublishError::Transient(format!(
                "publish timed out after {}s",
                timeout.as_secs()
            ))
        })??;

        debug!(
            job_id = %job.id,
            remote_id = outcome.remote_id.as_deref(),
            "publish call succeeded"
        );
        Ok(outcome)
    }

    /// Fan a publish outcome out as a webhook event. Emission failures never
    /// fail the job path; delivery retries are the webhook dispatcher's.
    async fn emit_event(
        &self,
        event: &str,
        job: &PostJob,
        outcome: Option<&PublishOutcome>,
        error: Option<&str>,
    ) {
        let payload = serde_json::json!({
            "job_id": job.id,
            "user_id": job.user_id,
            "post_id": job.post_id,
            "platform": job.platform.as_str(),
            "remote_id": outcome.and_then(|o| o.remote_id.as_deref()),
            "url": outcome.and_then(|o| o.url.as_deref()),
            "error": error,
        });

        if let Err(e) = self.webhooks.emit(event, &payload).await {
            warn!(job_id = %job.id, event, error = %e, "event emission failed");
        }
    }

    /// Decrypt the integration's credential blob just before use. Jobs for
    /// platforms without a connected integration publish credential-less and
    /// let the publisher decide.
    async fn resolve_credentials(
        &self,
        job: &PostJob,
    ) -> std::result::Result<Option<Vec<u8>>, PublishError> {
        let integration =
            Integration::find_for_user_platform(&self.pool, &job.user_id, job.platform)
                .await
                .map_err(|e| PublishError::Transient(format!("integration lookup failed: {e}")))?;

        match integration.and_then(|i| i.encrypted_credentials) {
            Some(blob) => {
                let plaintext = self
                    .credentials
                    .decrypt(&blob)
                    .map_err(|e| PublishError::Permanent(format!("credential decrypt failed: {e}")))?;
                Ok(Some(plaintext))
            }
            None => Ok(None),
        }
    }

    /// Re-queue with backoff or record the terminal failure.
    async fn record_failure(
        &self,
        job: &PostJob,
        publish_error: &PublishError,
        stats: &mut DispatchStats,
    ) -> Result<()> {
        let attempts = job.attempts + 1;
        let message = publish_error.to_string();

        match publish_error {
            PublishError::Permanent(_) => {
                error!(job_id = %job.id, attempts, error = %message, "publish failed")
            }
            PublishError::Transient(_) => {
                warn!(job_id = %job.id, attempts, error = %message, "publish failed")
            }
        }

        if attempts < job.max_attempts {
            let delay = self.backoff.delay_for_attempt(attempts as u32);
            let next_run = Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
            PostJob::reschedule(&self.pool, job.id, attempts, next_run, &message).await?;
            stats.rescheduled += 1;
        } else {
            PostJob::mark_failed(&self.pool, job.id, attempts, &message).await?;
            SyncAlert::raise(
                &self.pool,
                None,
                Some(job.id),
                AlertSeverity::Critical,
                &format!(
                    "job for {} exhausted {} attempts: {message}",
                    job.platform, job.max_attempts
                ),
            )
            .await?;
            stats.failed += 1;
            self.emit_event("post.failed", job, None, Some(&message)).await;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }
}
