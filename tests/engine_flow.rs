//! Full engine round trip: schedule a due job, let the supervised dispatch
//! loop claim and publish it, then shut the loops down cleanly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use syndicate_core::config::EngineConfig;
use syndicate_core::database::connect_in_memory;
use syndicate_core::engine::Engine;
use syndicate_core::models::{JobStatus, Platform, PostJob};
use syndicate_core::scheduler::{
    PublishError, PublishOutcome, Publisher, ScheduleRequest,
};

struct RecordingPublisher {
    platform: Platform,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(
        &self,
        _credentials: Option<&[u8]>,
        content: &str,
        _media_refs: &[String],
    ) -> Result<PublishOutcome, PublishError> {
        assert!(!content.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PublishOutcome {
            remote_id: Some("remote-1".to_string()),
            url: None,
        })
    }
}

#[tokio::test]
async fn due_job_is_published_by_the_dispatch_loop() {
    let pool = connect_in_memory().await.expect("pool");
    let mut config = EngineConfig::default();
    config.scheduler.poll_interval_seconds = 1;

    let engine = Engine::builder(config).build_with_pool(pool.clone());
    let calls = Arc::new(AtomicU32::new(0));
    engine.publishers().register(Arc::new(RecordingPublisher {
        platform: Platform::Twitter,
        calls: calls.clone(),
    }));

    let outcome = engine
        .scheduler()
        .schedule_jobs(ScheduleRequest {
            user_id: "user-1".to_string(),
            post_id: Some("post-1".to_string()),
            content: "release announcement".to_string(),
            platforms: vec!["twitter".to_string()],
            schedule_date: (Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
            media_urls: vec![],
            options: None,
        })
        .await
        .expect("schedule");
    assert_eq!(outcome.created.len(), 1);
    assert!(outcome.process_immediately);
    let job_id = outcome.created[0];

    // The first dispatch tick fires as soon as the loop starts.
    let supervisor = engine.start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = PostJob::find_by_id(&pool, job_id)
            .await
            .expect("query")
            .expect("job row");
        if job.status == JobStatus::Succeeded {
            assert!(job.claimed_at.is_none());
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never published, status {:?}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    supervisor.shutdown().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let snapshot = engine.health().snapshot().await.expect("snapshot");
    assert_eq!(snapshot.pending_jobs, 0);
    assert!(snapshot.is_healthy());
}
