//! # Database Layer
//!
//! SQLite pool construction and embedded migrations. Every durable table the
//! engine owns (`post_jobs`, webhook subscription/delivery tables, sync
//! telemetry) is created by the migrations under `migrations/`.

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Connect to the configured database and apply pending migrations.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;

    info!(url = %config.url, max_connections = config.max_connections, "database connected");
    Ok(pool)
}

/// Connect to a fresh in-memory database, migrated and ready.
///
/// A single connection keeps the `:memory:` database alive and shared for
/// the pool's lifetime. Used by the test suite and local experimentation.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Apply embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_has_schema() {
        let pool = connect_in_memory().await.expect("pool");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_jobs")
            .fetch_one(&pool)
            .await
            .expect("post_jobs table should exist");
        assert_eq!(count.0, 0);
    }
}
