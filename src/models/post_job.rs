//! # PostJob Model
//!
//! One unit of scheduled publication: one row per (user, post, platform,
//! schedule time). Rows are created idempotently: the `idempotency_key`
//! carries a unique constraint and inserts use do-nothing-on-conflict
//! semantics, so a retried schedule request can never duplicate work.
//!
//! ## Lifecycle
//!
//! `pending → processing → succeeded | failed`, forward-only. The
//! `pending → processing` transition is a conditional update and acts as the
//! row's mutex: exactly one dispatch worker wins the claim. A `failed` row
//! with attempts left is returned to `pending` with backoff folded into
//! `run_at`; at the ceiling it is terminal. Rows are retained for audit and
//! never hard-deleted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::Platform;

/// Job status state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
}

const SELECT_COLUMNS: &str = "id, idempotency_key, user_id, post_id, platform, run_at, status, \
     attempts, max_attempts, content, media_refs, last_error, claimed_at, created_at, updated_at";

/// A scheduled publication row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PostJob {
    pub id: Uuid,
    pub idempotency_key: String,
    pub user_id: String,
    pub post_id: Option<String>,
    pub platform: Platform,
    pub run_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    /// Platform-adapted text, ready to publish as-is
    pub content: String,
    pub media_refs: Json<Vec<String>>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New PostJob for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPostJob {
    pub idempotency_key: String,
    pub user_id: String,
    pub post_id: Option<String>,
    pub platform: Platform,
    pub run_at: DateTime<Utc>,
    pub max_attempts: i64,
    pub content: String,
    pub media_refs: Vec<String>,
}

impl PostJob {
    /// Insert with do-nothing-on-conflict semantics. Returns the freshly
    /// inserted row, or `None` when a job with the same idempotency key
    /// already exists.
    pub async fn insert_ignore(
        pool: &SqlitePool,
        new_job: NewPostJob,
    ) -> Result<Option<PostJob>, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO post_jobs (
                id, idempotency_key, user_id, post_id, platform, run_at, status,
                attempts, max_attempts, content, media_refs, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?, ?)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {SELECT_COLUMNS}
            "#
        );

        sqlx::query_as::<_, PostJob>(&query)
            .bind(Uuid::new_v4())
            .bind(&new_job.idempotency_key)
            .bind(&new_job.user_id)
            .bind(&new_job.post_id)
            .bind(new_job.platform)
            .bind(new_job.run_at)
            .bind(new_job.max_attempts)
            .bind(&new_job.content)
            .bind(Json(&new_job.media_refs))
            .bind(now)
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    /// Find a job by ID
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<PostJob>, sqlx::Error> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM post_jobs WHERE id = ?");
        sqlx::query_as::<_, PostJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a job by its idempotency key
    pub async fn find_by_idempotency_key(
        pool: &SqlitePool,
        key: &str,
    ) -> Result<Option<PostJob>, sqlx::Error> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM post_jobs WHERE idempotency_key = ?");
        sqlx::query_as::<_, PostJob>(&query)
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Pending jobs whose `run_at` has arrived, oldest first.
    pub async fn due_pending(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostJob>, sqlx::Error> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM post_jobs \
             WHERE status = 'pending' AND run_at <= ? \
             ORDER BY run_at ASC LIMIT ?"
        );
        sqlx::query_as::<_, PostJob>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Atomically claim a pending job for processing. Exactly one concurrent
    /// caller observes `true`; everyone else sees the row already claimed.
    pub async fn claim(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE post_jobs SET status = 'processing', claimed_at = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Undo a claim that will not be attempted (`processing → pending`),
    /// leaving attempts and run_at untouched. Used when admission is denied
    /// after the row was claimed.
    pub async fn release(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE post_jobs SET status = 'pending', claimed_at = NULL, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a processing job succeeded.
    pub async fn mark_succeeded(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE post_jobs SET status = 'succeeded', claimed_at = NULL, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Return a failed attempt's job to `pending` with the retry delay
    /// folded into a revised `run_at`.
    pub async fn reschedule(
        pool: &SqlitePool,
        id: Uuid,
        attempts: i64,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE post_jobs \
             SET status = 'pending', attempts = ?, run_at = ?, last_error = ?, \
                 claimed_at = NULL, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(attempts)
        .bind(next_run_at)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a terminal failure (retry budget exhausted).
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: Uuid,
        attempts: i64,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE post_jobs \
             SET status = 'failed', attempts = ?, last_error = ?, claimed_at = NULL, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(attempts)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cooperative cancellation: only a job not yet claimed can be
    /// cancelled. An in-flight attempt finishes under its own timeout.
    pub async fn cancel(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE post_jobs SET status = 'cancelled', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Re-queue jobs stuck in `processing` past the claim lease: crash
    /// recovery for workers that died mid-attempt. Returns how many rows
    /// were recovered.
    pub async fn recover_stale(
        pool: &SqlitePool,
        claim_lease: Duration,
    ) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - claim_lease;
        let result = sqlx::query(
            "UPDATE post_jobs \
             SET status = 'pending', claimed_at = NULL, updated_at = ? \
             WHERE status = 'processing' AND claimed_at IS NOT NULL AND claimed_at <= ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Count jobs currently in a status, for the health surface.
    pub async fn count_with_status(
        pool: &SqlitePool,
        status: JobStatus,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_jobs WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect_in_memory;

    fn sample_job(key: &str) -> NewPostJob {
        NewPostJob {
            idempotency_key: key.to_string(),
            user_id: "user-1".to_string(),
            post_id: Some("post-1".to_string()),
            platform: Platform::Twitter,
            run_at: Utc::now(),
            max_attempts: 5,
            content: "hello world".to_string(),
            media_refs: vec!["media-1".to_string()],
        }
    }

    #[tokio::test]
    async fn test_insert_ignore_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();

        let first = PostJob::insert_ignore(&pool, sample_job("key-1"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = PostJob::insert_ignore(&pool, sample_job("key-1"))
            .await
            .unwrap();
        assert!(second.is_none());

        let existing = PostJob::find_by_idempotency_key(&pool, "key-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(existing.id, first.unwrap().id);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let pool = connect_in_memory().await.unwrap();
        let job = PostJob::insert_ignore(&pool, sample_job("key-2"))
            .await
            .unwrap()
            .unwrap();

        assert!(PostJob::claim(&pool, job.id).await.unwrap());
        assert!(!PostJob::claim(&pool, job.id).await.unwrap());

        let claimed = PostJob::find_by_id(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.claimed_at.is_some());

        // Release undoes the claim without spending an attempt.
        assert!(PostJob::release(&pool, job.id).await.unwrap());
        assert!(!PostJob::release(&pool, job.id).await.unwrap());
        let released = PostJob::find_by_id(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert!(released.claimed_at.is_none());
        assert_eq!(released.attempts, 0);
        assert!(PostJob::claim(&pool, job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_transitions_are_forward_only() {
        let pool = connect_in_memory().await.unwrap();
        let job = PostJob::insert_ignore(&pool, sample_job("key-3"))
            .await
            .unwrap()
            .unwrap();

        // Cannot succeed a job that was never claimed.
        assert!(!PostJob::mark_succeeded(&pool, job.id).await.unwrap());

        assert!(PostJob::claim(&pool, job.id).await.unwrap());
        assert!(PostJob::mark_succeeded(&pool, job.id).await.unwrap());

        // Terminal: no further transitions.
        assert!(!PostJob::claim(&pool, job.id).await.unwrap());
        assert!(!PostJob::cancel(&pool, job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_processing_jobs_are_recovered() {
        let pool = connect_in_memory().await.unwrap();
        let job = PostJob::insert_ignore(&pool, sample_job("key-4"))
            .await
            .unwrap()
            .unwrap();
        PostJob::claim(&pool, job.id).await.unwrap();

        // Zero lease: anything claimed is already stale.
        let recovered = PostJob::recover_stale(&pool, Duration::zero()).await.unwrap();
        assert_eq!(recovered, 1);

        let row = PostJob::find_by_id(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
        assert!(row.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_due_pending_orders_by_run_at() {
        let pool = connect_in_memory().await.unwrap();
        let mut late = sample_job("late");
        late.run_at = Utc::now() - Duration::minutes(1);
        let mut early = sample_job("early");
        early.run_at = Utc::now() - Duration::minutes(10);
        let mut future = sample_job("future");
        future.run_at = Utc::now() + Duration::hours(1);

        PostJob::insert_ignore(&pool, late).await.unwrap();
        PostJob::insert_ignore(&pool, early).await.unwrap();
        PostJob::insert_ignore(&pool, future).await.unwrap();

        let due = PostJob::due_pending(&pool, Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].idempotency_key, "early");
        assert_eq!(due[1].idempotency_key, "late");
    }
}
