use crate::config::DatabaseConfig;
use crate::error::{BillingError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Opens the billing database and applies pending migrations
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let url = if config.url.starts_with("sqlite:") {
        config.url.clone()
    } else {
        format!("sqlite:{}", config.url)
    };

    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| BillingError::database("parse_database_url", e))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect_with(options)
        .await
        .map_err(|e| BillingError::database("connect", e))?;

    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: "run_migrations".to_string(),
            source: Box::new(e),
        })?;

    info!("Database migrations applied");
    Ok(())
}
