//! # Provider Fallback Router
//!
//! Selects the highest-priority healthy backend for a capability and walks
//! a degrade chain when backends fail: registered image sources in priority
//! order (AI providers, then stock search), then a locally generated
//! placeholder, then nothing. The first stage producing a non-empty result
//! short-circuits the chain; the chosen stage and reason travel back to the
//! caller so degraded quality can be surfaced to the user.
//!
//! Every attempt's outcome feeds the health tracker, and a background probe
//! sweep re-tests unhealthy providers so they recover without live traffic.

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::resilience::provider_health::ProviderHealthTracker;

/// Stage name reported when the chain bottoms out on the local placeholder
pub const PLACEHOLDER_STAGE: &str = "placeholder";
/// Stage name reported when no image could be produced at all
pub const NONE_STAGE: &str = "none";

/// Provider call failure
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// A produced image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub url: String,
}

impl GeneratedImage {
    /// A result with an empty URL is not usable output.
    pub fn is_valid(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// One interchangeable image backend
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Stable id used for health tracking and stage reporting
    fn id(&self) -> &str;

    /// Ascending selection order; lower runs first
    fn priority(&self) -> u32;

    /// Historical reliability score used to break priority ties (higher
    /// wins)
    fn reliability(&self) -> f64 {
        1.0
    }

    /// Produce an image for the prompt, or `None` when the source has
    /// nothing suitable (not an error).
    async fn generate(&self, prompt: &str) -> Result<Option<GeneratedImage>, ProviderError>;

    /// Trivial no-op request used by the background health sweep.
    async fn probe(&self) -> Result<(), ProviderError>;
}

/// Result of walking the degrade chain
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub image: Option<GeneratedImage>,
    /// Source id (or [`PLACEHOLDER_STAGE`]/[`NONE_STAGE`]) that produced the
    /// result
    pub stage: String,
    /// True when anything before the producing stage failed or was skipped
    pub degraded: bool,
    /// Why earlier stages did not produce, for user-facing warnings
    pub reason: Option<String>,
}

/// Health-aware router over registered image sources
pub struct FallbackRouter {
    sources: RwLock<Vec<Arc<dyn ImageSource>>>,
    health: Arc<ProviderHealthTracker>,
    placeholder_enabled: bool,
}

impl FallbackRouter {
    pub fn new(health: Arc<ProviderHealthTracker>) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            health,
            placeholder_enabled: true,
        }
    }

    pub fn without_placeholder(health: Arc<ProviderHealthTracker>) -> Self {
        Self {
            placeholder_enabled: false,
            ..Self::new(health)
        }
    }

    pub fn register(&self, source: Arc<dyn ImageSource>) {
        debug!(provider_id = source.id(), priority = source.priority(), "image source registered");
        self.sources.write().push(source);
    }

    /// Healthy candidates sorted by ascending priority, ties broken by
    /// descending reliability.
    pub fn ranked_candidates(&self) -> Vec<Arc<dyn ImageSource>> {
        let mut candidates: Vec<Arc<dyn ImageSource>> = self
            .sources
            .read()
            .iter()
            .filter(|s| self.health.is_healthy(s.id()))
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| {
                    b.reliability()
                        .partial_cmp(&a.reliability())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        candidates
    }

    /// The backend the router would use right now, if any.
    pub fn select_provider(&self) -> Option<Arc<dyn ImageSource>> {
        self.ranked_candidates().into_iter().next()
    }

    /// Report an out-of-band call outcome (callers that bypass
    /// [`generate_image`] still feed health state).
    pub fn report_outcome(&self, provider_id: &str, success: bool) {
        self.health.report_outcome(provider_id, success);
    }

    /// Walk the degrade chain until a stage produces a usable image.
    #[instrument(skip(self))]
    pub async fn generate_image(&self, prompt: &str) -> ImageResult {
        let candidates = self.ranked_candidates();
        let mut degraded = false;
        let mut last_reason: Option<String> = None;

        for source in candidates {
            match source.generate(prompt).await {
                Ok(Some(image)) if image.is_valid() => {
                    self.health.report_outcome(source.id(), true);
                    if degraded {
                        info!(stage = source.id(), "image produced by fallback stage");
                    }
                    return ImageResult {
                        image: Some(image),
                        stage: source.id().to_string(),
                        degraded,
                        reason: last_reason,
                    };
                }
                Ok(_) => {
                    // The provider worked but had nothing usable; keep
                    // walking without penalizing its health.
                    self.health.report_outcome(source.id(), true);
                    last_reason = Some(format!("{} returned no usable image", source.id()));
                    degraded = true;
                }
                Err(e) => {
                    self.health.report_outcome(source.id(), false);
                    warn!(provider_id = source.id(), error = %e, "image source failed");
                    last_reason = Some(format!("{}: {e}", source.id()));
                    degraded = true;
                }
            }
        }

        if self.placeholder_enabled {
            ImageResult {
                image: Some(generate_placeholder(prompt)),
                stage: PLACEHOLDER_STAGE.to_string(),
                degraded: true,
                reason: last_reason.or_else(|| Some("no image source available".to_string())),
            }
        } else {
            ImageResult {
                image: None,
                stage: NONE_STAGE.to_string(),
                degraded: true,
                reason: last_reason.or_else(|| Some("no image source available".to_string())),
            }
        }
    }

    /// Probe every registered source, healthy or not, so unhealthy
    /// providers recover without waiting for live traffic.
    #[instrument(skip(self))]
    pub async fn probe_all(&self) {
        let sources: Vec<Arc<dyn ImageSource>> = self.sources.read().clone();
        for source in sources {
            let outcome = source.probe().await;
            self.health.report_outcome(source.id(), outcome.is_ok());
        }
    }
}

/// Deterministic local placeholder, always available as the last resort
/// before giving up on imagery entirely.
fn generate_placeholder(prompt: &str) -> GeneratedImage {
    let digest = hex::encode(Sha256::digest(prompt.as_bytes()));
    GeneratedImage {
        url: format!("https://placeholder.invalid/{}.png", &digest[..16]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StubSource {
        id: String,
        priority: u32,
        reliability: f64,
        fail: AtomicBool,
        empty: bool,
        calls: AtomicU32,
    }

    impl StubSource {
        fn new(id: &str, priority: u32) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                priority,
                reliability: 1.0,
                fail: AtomicBool::new(false),
                empty: false,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ImageSource for StubSource {
        fn id(&self) -> &str {
            &self.id
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn reliability(&self) -> f64 {
            self.reliability
        }

        async fn generate(&self, _prompt: &str) -> Result<Option<GeneratedImage>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError("stub outage".into()));
            }
            if self.empty {
                return Ok(None);
            }
            Ok(Some(GeneratedImage {
                url: format!("https://img.example/{}.png", self.id),
            }))
        }

        async fn probe(&self) -> Result<(), ProviderError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ProviderError("probe failed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn router_with(sources: &[Arc<StubSource>]) -> FallbackRouter {
        let router = FallbackRouter::new(Arc::new(ProviderHealthTracker::default()));
        for source in sources {
            router.register(source.clone());
        }
        router
    }

    #[tokio::test]
    async fn test_selection_prefers_priority_then_reliability() {
        let primary = StubSource::new("primary", 1);
        let secondary = StubSource::new("secondary", 2);
        let router = router_with(&[secondary, primary]);

        assert_eq!(router.select_provider().unwrap().id(), "primary");
    }

    #[tokio::test]
    async fn test_unhealthy_provider_is_excluded_until_recovery() {
        let primary = StubSource::new("primary", 1);
        let secondary = StubSource::new("secondary", 2);
        let router = router_with(&[primary.clone(), secondary]);

        for _ in 0..5 {
            router.report_outcome("primary", false);
        }
        assert_eq!(router.select_provider().unwrap().id(), "secondary");

        // One success decrements below the threshold and restores it.
        router.report_outcome("primary", true);
        assert_eq!(router.select_provider().unwrap().id(), "primary");
    }

    #[tokio::test]
    async fn test_degrade_chain_falls_through_failures() {
        let primary = StubSource::new("primary", 1);
        primary.fail.store(true, Ordering::SeqCst);
        let secondary = StubSource::new("secondary", 2);
        let router = router_with(&[primary, secondary]);

        let result = router.generate_image("sunset over mountains").await;
        assert_eq!(result.stage, "secondary");
        assert!(result.degraded);
        assert!(result.reason.unwrap().contains("primary"));
        assert!(result.image.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_chain_bottoms_out_on_placeholder() {
        let primary = StubSource::new("primary", 1);
        primary.fail.store(true, Ordering::SeqCst);
        let router = router_with(&[primary]);

        let result = router.generate_image("a prompt").await;
        assert_eq!(result.stage, PLACEHOLDER_STAGE);
        assert!(result.degraded);
        assert!(result.image.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_chain_without_placeholder_reports_none() {
        let router =
            FallbackRouter::without_placeholder(Arc::new(ProviderHealthTracker::default()));
        let result = router.generate_image("a prompt").await;
        assert_eq!(result.stage, NONE_STAGE);
        assert!(result.image.is_none());
    }

    #[tokio::test]
    async fn test_probe_recovers_unhealthy_provider() {
        let primary = StubSource::new("primary", 1);
        let router = router_with(&[primary.clone()]);

        for _ in 0..5 {
            router.report_outcome("primary", false);
        }
        assert!(router.select_provider().is_none());

        // Provider back up; a single probe restores it.
        router.probe_all().await;
        assert_eq!(router.select_provider().unwrap().id(), "primary");
    }
}
