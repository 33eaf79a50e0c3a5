//! # Job Scheduling and Dispatch
//!
//! Turns publish requests into durable, idempotent [`crate::models::PostJob`]
//! rows and drives them through their state machine:
//!
//! - [`job_scheduler`]: request validation, per-platform content
//!   adaptation, idempotency-key derivation, bulk insert-or-ignore.
//! - [`dispatcher`]: the claim-based dispatch loop: rate-limit admission,
//!   platform publish with a hard timeout, backoff re-queue or terminal
//!   failure, stale-claim recovery.
//! - [`publisher`]: the per-platform publish capability and its registry.
//! - [`adapter`]: the content-adaptation collaborator seam.

pub mod adapter;
pub mod dispatcher;
pub mod job_scheduler;
pub mod publisher;

pub use adapter::{AdaptedContent, ContentAdapter, PassthroughAdapter};
pub use dispatcher::{DispatchStats, JobDispatcher};
pub use job_scheduler::{JobScheduler, ScheduleOutcome, ScheduleRequest};
pub use publisher::{PublishError, PublishOutcome, Publisher, PublisherRegistry};
