//! # Webhook Delivery
//!
//! Signed, retried delivery of engine events to user-configured HTTPS
//! endpoints:
//!
//! - [`signing`]: HMAC-SHA256 payload signatures and constant-time
//!   verification for inbound validation.
//! - [`dispatcher`]: delivery attempts, the pending-retry sweep, and event
//!   fan-out to matching subscriptions.

pub mod dispatcher;
pub mod signing;

pub use dispatcher::{WebhookDispatcher, SIGNATURE_HEADER};
pub use signing::{compute_signature, verify_signature};
