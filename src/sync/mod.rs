//! # Integration Sync Orchestration
//!
//! Periodic per-integration synchronization composing the resilience stack:
//! rate-limit admission, retry-executed provider calls, health reporting,
//! and persisted metrics/alerts.
//!
//! - [`credentials`]: the opaque encrypt/decrypt collaborator seam.
//! - [`orchestrator`]: the sync cycles and the single-loop-per-integration
//!   registry.

pub mod credentials;
pub mod orchestrator;

pub use credentials::{CredentialStore, PlaintextCredentialStore};
pub use orchestrator::{SyncCycleOutcome, SyncHandler, SyncOrchestrator, SyncReport};
