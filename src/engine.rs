//! # Engine Assembly
//!
//! Constructs the whole delivery engine once, as owned values: one pool, one
//! rate limiter, one provider health tracker, and the services wired to
//! them. Nothing here is global or lazily initialized; a process (or a test)
//! builds an [`Engine`], uses its services directly, and optionally starts
//! the background loops through [`Engine::start`].

use std::sync::Arc;
use std::time::Duration;
use sqlx::SqlitePool;
use tracing::error;

use crate::config::EngineConfig;
use crate::database;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::providers::FallbackRouter;
use crate::resilience::{ProviderHealthTracker, RateLimiter};
use crate::scheduler::{
    ContentAdapter, JobDispatcher, JobScheduler, PassthroughAdapter, PublisherRegistry,
};
use crate::supervisor::Supervisor;
use crate::sync::{CredentialStore, PlaintextCredentialStore, SyncHandler, SyncOrchestrator};
use crate::webhook::WebhookDispatcher;

/// Collects the pluggable seams before the engine is assembled.
pub struct EngineBuilder {
    config: EngineConfig,
    adapter: Arc<dyn ContentAdapter>,
    credentials: Arc<dyn CredentialStore>,
    sync_handler: Option<Arc<dyn SyncHandler>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            adapter: Arc::new(PassthroughAdapter),
            credentials: Arc::new(PlaintextCredentialStore),
            sync_handler: None,
        }
    }

    /// Replace the per-platform content adapter.
    pub fn adapter(mut self, adapter: Arc<dyn ContentAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Replace the credential codec used for stored integration secrets.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Provide the integration sync implementation. Without one the sync
    /// scan loop is not started.
    pub fn sync_handler(mut self, handler: Arc<dyn SyncHandler>) -> Self {
        self.sync_handler = Some(handler);
        self
    }

    /// Connect, migrate, and wire every service.
    pub async fn build(self) -> Result<Engine> {
        let pool = database::connect(&self.config.database).await?;
        Ok(self.build_with_pool(pool))
    }

    /// Wire services onto an existing pool (tests use in-memory pools).
    pub fn build_with_pool(self, pool: SqlitePool) -> Engine {
        let rate_limiter = Arc::new(RateLimiter::new(self.config.rate_limits.clone()));
        let provider_health = Arc::new(ProviderHealthTracker::new(&self.config.provider_health));
        let registry = Arc::new(PublisherRegistry::new());

        let scheduler = Arc::new(JobScheduler::new(pool.clone(), self.adapter));
        let webhooks = Arc::new(WebhookDispatcher::new(
            pool.clone(),
            self.config.webhook.clone(),
        ));
        let dispatcher = Arc::new(JobDispatcher::new(
            pool.clone(),
            registry.clone(),
            rate_limiter.clone(),
            self.credentials.clone(),
            webhooks.clone(),
            self.config.scheduler.clone(),
        ));
        let sync = self.sync_handler.map(|handler| {
            Arc::new(SyncOrchestrator::new(
                pool.clone(),
                rate_limiter.clone(),
                provider_health.clone(),
                self.credentials.clone(),
                handler,
                &self.config.sync,
            ))
        });
        let images = Arc::new(FallbackRouter::new(provider_health.clone()));
        let monitor = HealthMonitor::new(pool.clone(), provider_health.clone());

        Engine {
            config: self.config,
            pool,
            rate_limiter,
            provider_health,
            registry,
            scheduler,
            dispatcher,
            webhooks,
            sync,
            images,
            monitor,
        }
    }
}

/// The assembled engine: every service plus the shared state they hang off.
pub struct Engine {
    config: EngineConfig,
    pool: SqlitePool,
    rate_limiter: Arc<RateLimiter>,
    provider_health: Arc<ProviderHealthTracker>,
    registry: Arc<PublisherRegistry>,
    scheduler: Arc<JobScheduler>,
    dispatcher: Arc<JobDispatcher>,
    webhooks: Arc<WebhookDispatcher>,
    sync: Option<Arc<SyncOrchestrator>>,
    images: Arc<FallbackRouter>,
    monitor: HealthMonitor,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn webhooks(&self) -> &WebhookDispatcher {
        &self.webhooks
    }

    pub fn sync(&self) -> Option<&SyncOrchestrator> {
        self.sync.as_deref()
    }

    pub fn images(&self) -> &FallbackRouter {
        &self.images
    }

    /// Platform publishers register here before loops start.
    pub fn publishers(&self) -> &PublisherRegistry {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn provider_health(&self) -> &Arc<ProviderHealthTracker> {
        &self.provider_health
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Start the background loops and hand their ownership to a supervisor.
    /// Loop failures are logged and the loop keeps running; only shutdown
    /// stops it.
    pub fn start(&self) -> Supervisor {
        let mut supervisor = Supervisor::new();

        let dispatcher = self.dispatcher.clone();
        supervisor.spawn_loop(
            "job-dispatch",
            Duration::from_secs(self.config.scheduler.poll_interval_seconds),
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    if let Err(e) = dispatcher.run_cycle().await {
                        error!(error = %e, "dispatch cycle failed");
                    }
                }
            },
        );

        let webhooks = self.webhooks.clone();
        supervisor.spawn_loop(
            "webhook-sweep",
            Duration::from_secs(self.config.webhook.sweep_interval_seconds),
            move || {
                let webhooks = webhooks.clone();
                async move {
                    if let Err(e) = webhooks.process_pending_deliveries().await {
                        error!(error = %e, "webhook sweep failed");
                    }
                }
            },
        );

        if let Some(sync) = &self.sync {
            let sync = sync.clone();
            supervisor.spawn_loop(
                "sync-scan",
                Duration::from_secs(self.config.sync.scan_interval_seconds),
                move || {
                    let sync = sync.clone();
                    async move {
                        if let Err(e) = sync.run_scan().await {
                            error!(error = %e, "sync scan failed");
                        }
                    }
                },
            );
        }

        let images = self.images.clone();
        let provider_health = self.provider_health.clone();
        supervisor.spawn_loop(
            "provider-probe",
            Duration::from_secs(self.config.provider_health.probe_interval_seconds),
            move || {
                let images = images.clone();
                let provider_health = provider_health.clone();
                async move {
                    images.probe_all().await;
                    provider_health.prune_stale(chrono::Duration::hours(24));
                }
            },
        );

        supervisor
    }
}
