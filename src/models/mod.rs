//! # Data Layer
//!
//! Durable rows for delivery state: scheduled post jobs, webhook
//! subscriptions and delivery attempts, integrations and their sync
//! telemetry. Every mutation is a small, explicit SQL statement; the status
//! transitions that matter for correctness (claiming, terminal failure) are
//! conditional updates so concurrent loops cannot double-own a row.

pub mod integration;
pub mod post_job;
pub mod webhook;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use integration::{
    AlertSeverity, Integration, IntegrationStatus, NewIntegration, SyncAlert, SyncMetric,
};
pub use post_job::{JobStatus, NewPostJob, PostJob};
pub use webhook::{
    DeliveryStatus, NewWebhookSubscription, WebhookDelivery, WebhookSubscription,
};

/// Supported publish destinations.
///
/// Adding a platform means adding a variant here and registering a
/// [`crate::scheduler::publisher::Publisher`] for it; the dispatcher itself
/// never branches on platform names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
    Threads,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Facebook,
        Platform::Instagram,
        Platform::Threads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Threads => "threads",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "threads" => Ok(Platform::Threads),
            other => Err(format!("unsupported platform: {other}")),
        }
    }
}

/// How often an integration synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SyncFrequency {
    Realtime,
    Hourly,
    Daily,
    Weekly,
    /// Only synced on explicit operator request
    Manual,
}

impl SyncFrequency {
    /// Interval between automatic sync cycles; `None` for manual.
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            SyncFrequency::Realtime => Some(chrono::Duration::minutes(1)),
            SyncFrequency::Hourly => Some(chrono::Duration::hours(1)),
            SyncFrequency::Daily => Some(chrono::Duration::days(1)),
            SyncFrequency::Weekly => Some(chrono::Duration::weeks(1)),
            SyncFrequency::Manual => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trips_through_str() {
        for platform in Platform::ALL {
            assert_eq!(Platform::from_str(platform.as_str()).unwrap(), platform);
        }
        assert!(Platform::from_str("myspace").is_err());
    }

    #[test]
    fn test_platform_parse_is_case_insensitive() {
        assert_eq!(Platform::from_str("Twitter").unwrap(), Platform::Twitter);
    }

    #[test]
    fn test_manual_frequency_has_no_interval() {
        assert!(SyncFrequency::Manual.interval().is_none());
        assert!(SyncFrequency::Hourly.interval().is_some());
    }
}
