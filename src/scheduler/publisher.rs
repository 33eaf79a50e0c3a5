//! # Platform Publishers
//!
//! One [`Publisher`] implementation per destination platform, registered in
//! a lookup table. The dispatcher resolves the capability through the
//! registry and never branches on platform names, so adding a platform
//! touches only the new implementation and its registration.

use crate::models::Platform;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Outcome of a successful platform publish
#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    /// Platform-assigned identifier for the published content
    pub remote_id: Option<String>,
    /// Public URL, when the platform provides one
    pub url: Option<String>,
}

/// Publish failure classification.
///
/// The engine cannot locally distinguish every permanent case, so both kinds
/// are retried under the same policy; permanent failures log at higher
/// severity and stand out in alerts once terminal.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// Timeouts, 5xx, connection resets: expected to heal on their own
    #[error("transient publish failure: {0}")]
    Transient(String),
    /// 4xx (other than rate limiting), malformed credentials
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

/// Capability interface for publishing to one platform
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Publish adapted content with optional decrypted credentials. The
    /// caller enforces the hard timeout; implementations just do the call.
    async fn publish(
        &self,
        credentials: Option<&[u8]>,
        content: &str,
        media_refs: &[String],
    ) -> Result<PublishOutcome, PublishError>;
}

/// Lookup table of platform publish capabilities
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: DashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher, replacing any previous registration for its
    /// platform.
    pub fn register(&self, publisher: Arc<dyn Publisher>) {
        let platform = publisher.platform();
        debug!(platform = %platform, "publisher registered");
        self.publishers.insert(platform, publisher);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).map(|p| p.clone())
    }

    pub fn registered_platforms(&self) -> Vec<Platform> {
        self.publishers.iter().map(|p| *p.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPublisher(Platform);

    #[async_trait]
    impl Publisher for NoopPublisher {
        fn platform(&self) -> Platform {
            self.0
        }

        async fn publish(
            &self,
            _credentials: Option<&[u8]>,
            _content: &str,
            _media_refs: &[String],
        ) -> Result<PublishOutcome, PublishError> {
            Ok(PublishOutcome::default())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = PublisherRegistry::new();
        registry.register(Arc::new(NoopPublisher(Platform::Twitter)));

        assert!(registry.get(Platform::Twitter).is_some());
        assert!(registry.get(Platform::Linkedin).is_none());
        assert_eq!(registry.registered_platforms(), vec![Platform::Twitter]);
    }
}
