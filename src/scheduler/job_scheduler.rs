//! # Job Scheduler
//!
//! Turns a user's publish request into durable, idempotent job rows, one
//! per target platform. The idempotency key is a SHA-256 digest of the
//! request's identifying attributes, so an identical request retried from
//! the caller side lands on the existing rows instead of duplicating work.
//!
//! The scheduling endpoint succeeds as soon as rows are durable; eventual
//! delivery outcomes surface later through status queries and alerts, never
//! as synchronous errors here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{NewPostJob, Platform, PostJob};
use crate::scheduler::adapter::ContentAdapter;

/// Default retry budget for a publish job
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

/// A schedule request as received from the CRUD layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub user_id: String,
    pub post_id: Option<String>,
    pub content: String,
    pub platforms: Vec<String>,
    /// ISO-8601 instant at which the post should go out
    pub schedule_date: String,
    pub media_urls: Vec<String>,
    pub options: Option<serde_json::Value>,
}

/// Result of one schedule request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    /// Every job backing this request, freshly created or pre-existing
    /// under the same idempotency key
    pub created: Vec<Uuid>,
    /// Jobs already due at submission time; callers can trigger immediate
    /// dispatch instead of waiting for the next poll
    pub due_now: Vec<Uuid>,
    pub process_immediately: bool,
    pub message: String,
}

/// Derive the deterministic idempotency key for one (user, post, time,
/// platform) combination.
pub fn idempotency_key(
    user_id: &str,
    post_id: Option<&str>,
    run_at: DateTime<Utc>,
    platform: Platform,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(post_id.unwrap_or("ad-hoc").as_bytes());
    hasher.update(b":");
    hasher.update(run_at.timestamp_millis().to_be_bytes());
    hasher.update(b":");
    hasher.update(platform.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Creates durable post jobs from schedule requests
pub struct JobScheduler {
    pool: SqlitePool,
    adapter: Arc<dyn ContentAdapter>,
}

impl JobScheduler {
    pub fn new(pool: SqlitePool, adapter: Arc<dyn ContentAdapter>) -> Self {
        Self { pool, adapter }
    }

    /// Validate a request and create one job per platform, idempotently.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn schedule_jobs(&self, request: ScheduleRequest) -> Result<ScheduleOutcome> {
        let (platforms, run_at) = validate(&request)?;
        let now = Utc::now();

        let mut created = Vec::with_capacity(platforms.len());
        let mut due_now = Vec::new();

        for platform in platforms {
            let adapted = self
                .adapter
                .adapt(&request.content, platform, request.options.as_ref())
                .await;

            let key = idempotency_key(
                &request.user_id,
                request.post_id.as_deref(),
                run_at,
                platform,
            );

            let new_job = NewPostJob {
                idempotency_key: key.clone(),
                user_id: request.user_id.clone(),
                post_id: request.post_id.clone(),
                platform,
                run_at,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                content: adapted.content,
                media_refs: request.media_urls.clone(),
            };

            let job = match PostJob::insert_ignore(&self.pool, new_job).await? {
                Some(job) => job,
                // Identical request already scheduled; report the existing
                // job rather than erroring.
                None => PostJob::find_by_idempotency_key(&self.pool, &key)
                    .await?
                    .ok_or_else(|| {
                        EngineError::StateTransition(format!(
                            "job for key {key} vanished between insert and lookup"
                        ))
                    })?,
            };

            if job.run_at <= now {
                due_now.push(job.id);
            }
            created.push(job.id);
        }

        let process_immediately = !due_now.is_empty();
        info!(
            user_id = %request.user_id,
            jobs = created.len(),
            due_now = due_now.len(),
            "schedule request persisted"
        );

        Ok(ScheduleOutcome {
            message: format!("{} job(s) scheduled", created.len()),
            created,
            due_now,
            process_immediately,
        })
    }
}

/// Boundary validation: platforms from the supported set, non-empty content,
/// parseable ISO-8601 schedule date.
fn validate(request: &ScheduleRequest) -> Result<(Vec<Platform>, DateTime<Utc>)> {
    if request.content.trim().is_empty() {
        return Err(EngineError::Validation("content must not be empty".into()));
    }
    if request.platforms.is_empty() {
        return Err(EngineError::Validation(
            "at least one platform is required".into(),
        ));
    }

    let mut platforms = Vec::with_capacity(request.platforms.len());
    for name in &request.platforms {
        let platform = Platform::from_str(name).map_err(EngineError::Validation)?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }

    let run_at = DateTime::parse_from_rfc3339(&request.schedule_date)
        .map_err(|e| {
            EngineError::Validation(format!(
                "schedule_date is not a valid ISO-8601 instant: {e}"
            ))
        })?
        .with_timezone(&Utc);

    Ok((platforms, run_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect_in_memory;
    use crate::scheduler::adapter::PassthroughAdapter;

    fn scheduler(pool: SqlitePool) -> JobScheduler {
        JobScheduler::new(pool, Arc::new(PassthroughAdapter))
    }

    fn request(platforms: &[&str], schedule_date: &str) -> ScheduleRequest {
        ScheduleRequest {
            user_id: "user-1".to_string(),
            post_id: Some("post-1".to_string()),
            content: "launch day!".to_string(),
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
            schedule_date: schedule_date.to_string(),
            media_urls: vec![],
            options: None,
        }
    }

    #[tokio::test]
    async fn test_identical_requests_create_one_job_per_platform() {
        let pool = connect_in_memory().await.unwrap();
        let scheduler = scheduler(pool.clone());
        let req = request(&["twitter"], "2030-01-01T12:00:00Z");

        let first = scheduler.schedule_jobs(req.clone()).await.unwrap();
        let second = scheduler.schedule_jobs(req).await.unwrap();

        assert_eq!(first.created.len(), 1);
        assert_eq!(second.created, first.created);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_past_schedule_reports_due_now() {
        let pool = connect_in_memory().await.unwrap();
        let scheduler = scheduler(pool);

        let outcome = scheduler
            .schedule_jobs(request(&["twitter", "linkedin"], "2020-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.due_now.len(), 2);
        assert!(outcome.process_immediately);
    }

    #[tokio::test]
    async fn test_boundary_validation_rejections() {
        let pool = connect_in_memory().await.unwrap();
        let scheduler = scheduler(pool.clone());

        let mut bad_platform = request(&["myspace"], "2030-01-01T12:00:00Z");
        assert!(matches!(
            scheduler.schedule_jobs(bad_platform.clone()).await,
            Err(EngineError::Validation(_))
        ));

        bad_platform.platforms = vec!["twitter".to_string()];
        bad_platform.content = "   ".to_string();
        assert!(matches!(
            scheduler.schedule_jobs(bad_platform).await,
            Err(EngineError::Validation(_))
        ));

        let bad_date = request(&["twitter"], "tomorrow-ish");
        assert!(matches!(
            scheduler.schedule_jobs(bad_date).await,
            Err(EngineError::Validation(_))
        ));

        // Nothing was enqueued.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn test_idempotency_key_is_deterministic_and_distinct() {
        let run_at = Utc::now();
        let a = idempotency_key("u", Some("p"), run_at, Platform::Twitter);
        let b = idempotency_key("u", Some("p"), run_at, Platform::Twitter);
        let c = idempotency_key("u", Some("p"), run_at, Platform::Linkedin);
        let d = idempotency_key("u", None, run_at, Platform::Twitter);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
