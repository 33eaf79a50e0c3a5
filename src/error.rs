//! # Structured Error Handling
//!
//! Crate-wide error type covering every subsystem of the delivery engine.
//! Loops never propagate per-item errors upward; they log and continue, so
//! most call sites only ever see these at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Persistence failures from the sqlx layer.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Boundary rejections: bad URL, bad schedule date, unsupported
    /// platform. Never enqueued, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A row was not in the state a transition required.
    #[error("state transition error: {0}")]
    StateTransition(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential encrypt/decrypt collaborator failures.
    #[error("credential error: {0}")]
    Credential(String),

    /// Outbound delivery failure that exhausted its retry budget.
    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("sync error: {0}")]
    Sync(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
