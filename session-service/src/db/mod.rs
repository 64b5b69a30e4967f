//! PostgreSQL pool setup, migrations and liveness check.

use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Open a pool sized by `config`. The first connection is established
/// eagerly so a bad URL fails at startup.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "PostgreSQL pool ready"
    );

    Ok(pool)
}

/// Apply the embedded identity and refresh-token schema.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    let migrator = sqlx::migrate!("./migrations");
    migrator.run(pool).await?;
    tracing::info!(applied = migrator.iter().count(), "Schema is up to date");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database_url() -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/sessions_test".to_string())
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_pool_migrates_and_answers_health_check() {
        let config = DatabaseConfig {
            url: database_url(),
            max_connections: 2,
            min_connections: 1,
        };

        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        health_check(&pool).await.unwrap();
    }
}
