//! Database pool construction.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::{Error, Result};

/// Build the per-process connection pool.
///
/// Each pipeline iteration acquires a connection only for the duration of
/// its transaction, so a small pool is enough.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout())
        .connect(&config.database_url)
        .await
        .map_err(Error::from)
}

/// Startup probe; a process refuses to enter its loop when this fails.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| Error::QueryFailed {
            query: "PING".into(),
            source: Box::new(e),
            context: "Database startup probe failed".into(),
        })?;
    Ok(())
}
