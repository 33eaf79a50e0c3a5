//! # Content Adaptation Collaborator
//!
//! Platform-specific text rules live outside the engine. The scheduler calls
//! this seam once per target platform before persisting a job's content, and
//! stores the adapted text verbatim.

use crate::models::Platform;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of adapting raw content for one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptedContent {
    pub content: String,
    pub character_count: usize,
    /// Non-fatal notes (truncation, stripped formatting) surfaced to the user
    pub warnings: Vec<String>,
}

/// External pure-function collaborator: raw content + platform in, adapted
/// text out.
#[async_trait]
pub trait ContentAdapter: Send + Sync {
    async fn adapt(
        &self,
        content: &str,
        platform: Platform,
        options: Option<&serde_json::Value>,
    ) -> AdaptedContent;
}

/// Identity adapter for deployments that pre-adapt content upstream.
#[derive(Debug, Default, Clone)]
pub struct PassthroughAdapter;

#[async_trait]
impl ContentAdapter for PassthroughAdapter {
    async fn adapt(
        &self,
        content: &str,
        _platform: Platform,
        _options: Option<&serde_json::Value>,
    ) -> AdaptedContent {
        AdaptedContent {
            content: content.to_string(),
            character_count: content.chars().count(),
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_preserves_content() {
        let adapted = PassthroughAdapter
            .adapt("hello", Platform::Twitter, None)
            .await;
        assert_eq!(adapted.content, "hello");
        assert_eq!(adapted.character_count, 5);
        assert!(adapted.warnings.is_empty());
    }
}
