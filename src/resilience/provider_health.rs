//! # Provider Health Tracker
//!
//! Consecutive-failure accounting per external provider. A provider flips
//! unhealthy once its consecutive error count reaches the threshold
//! (5 by default); a success decrements the counter (it does not zero it)
//! so one fluke success after a failure streak cannot flap the provider
//! straight back into heavy rotation. The provider is healthy whenever the
//! counter sits below the threshold.

use crate::config::ProviderHealthConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Health snapshot for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub is_healthy: bool,
    pub consecutive_errors: u32,
    pub last_check: DateTime<Utc>,
}

impl ProviderHealth {
    fn fresh() -> Self {
        Self {
            is_healthy: true,
            consecutive_errors: 0,
            last_check: Utc::now(),
        }
    }
}

/// In-memory health registry for all external providers
#[derive(Debug)]
pub struct ProviderHealthTracker {
    entries: DashMap<String, ProviderHealth>,
    unhealthy_threshold: u32,
}

impl ProviderHealthTracker {
    pub fn new(config: &ProviderHealthConfig) -> Self {
        Self {
            entries: DashMap::new(),
            unhealthy_threshold: config.unhealthy_threshold.max(1),
        }
    }

    /// Record the outcome of one call against a provider.
    pub fn report_outcome(&self, provider_id: &str, success: bool) {
        let mut entry = self
            .entries
            .entry(provider_id.to_string())
            .or_insert_with(ProviderHealth::fresh);

        let was_healthy = entry.is_healthy;

        if success {
            entry.consecutive_errors = entry.consecutive_errors.saturating_sub(1);
        } else {
            entry.consecutive_errors += 1;
        }
        entry.is_healthy = entry.consecutive_errors < self.unhealthy_threshold;
        entry.last_check = Utc::now();

        if was_healthy && !entry.is_healthy {
            warn!(
                provider_id,
                consecutive_errors = entry.consecutive_errors,
                "provider flagged unhealthy"
            );
        } else if !was_healthy && entry.is_healthy {
            info!(provider_id, "provider recovered");
        }
    }

    /// Providers never seen are assumed healthy.
    pub fn is_healthy(&self, provider_id: &str) -> bool {
        self.entries
            .get(provider_id)
            .map(|e| e.is_healthy)
            .unwrap_or(true)
    }

    pub fn health_of(&self, provider_id: &str) -> Option<ProviderHealth> {
        self.entries.get(provider_id).map(|e| e.clone())
    }

    /// Provider ids currently flagged unhealthy, for the health surface.
    pub fn unhealthy_providers(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_healthy)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop entries that have not been touched within `max_age`. The tracker
    /// is in-memory and periodically reset; stale entries would otherwise
    /// pin outdated verdicts forever.
    pub fn prune_stale(&self, max_age: ChronoDuration) {
        let cutoff = Utc::now() - max_age;
        self.entries.retain(|_, health| health.last_check >= cutoff);
    }
}

impl Default for ProviderHealthTracker {
    fn default() -> Self {
        Self::new(&ProviderHealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_flips_unhealthy_at_threshold() {
        let tracker = ProviderHealthTracker::default();

        for _ in 0..4 {
            tracker.report_outcome("openai", false);
            assert!(tracker.is_healthy("openai"));
        }
        tracker.report_outcome("openai", false);
        assert!(!tracker.is_healthy("openai"));
    }

    #[test]
    fn test_single_success_decrements_and_restores() {
        let tracker = ProviderHealthTracker::default();

        for _ in 0..5 {
            tracker.report_outcome("openai", false);
        }
        assert!(!tracker.is_healthy("openai"));

        tracker.report_outcome("openai", true);
        let health = tracker.health_of("openai").unwrap();
        assert_eq!(health.consecutive_errors, 4);
        assert!(health.is_healthy);
    }

    #[test]
    fn test_unknown_provider_is_healthy() {
        let tracker = ProviderHealthTracker::default();
        assert!(tracker.is_healthy("never-seen"));
        assert!(tracker.unhealthy_providers().is_empty());
    }

    #[test]
    fn test_counter_floors_at_zero() {
        let tracker = ProviderHealthTracker::default();
        tracker.report_outcome("stable", true);
        tracker.report_outcome("stable", true);
        assert_eq!(tracker.health_of("stable").unwrap().consecutive_errors, 0);
    }

    #[test]
    fn test_prune_drops_nothing_recent() {
        let tracker = ProviderHealthTracker::default();
        tracker.report_outcome("openai", false);
        tracker.prune_stale(ChronoDuration::hours(1));
        assert!(tracker.health_of("openai").is_some());
    }
}
