use crate::config::AppConfig;
use crate::errors::InventoryError;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, InventoryError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

pub async fn establish_connection_with_config(
    config: &DbConfig,
) -> Result<DbPool, InventoryError> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(options).await.map_err(|e| {
        error!("Failed to connect to database: {}", e);
        InventoryError::DatabaseError(e)
    })?;
    info!("Database connection established");
    Ok(pool)
}

/// Creates a pool from the loaded application config.
pub async fn create_db_pool() -> Result<DbPool, InventoryError> {
    let cfg = crate::config::load_config()
        .map_err(|e| InventoryError::ValidationError(format!("Failed to load config: {}", e)))?;
    establish_connection_from_app_config(&cfg).await
}

pub async fn establish_connection_from_app_config(
    cfg: &AppConfig,
) -> Result<DbPool, InventoryError> {
    let config = DbConfig {
        url: cfg.database_url.clone(),
        max_connections: cfg.db_max_connections,
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

/// Applies the embedded schema migrations. Deployment runs this once at
/// startup; the core never alters the schema afterwards.
pub async fn run_migrations(pool: &DbPool) -> Result<(), InventoryError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();
    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(InventoryError::DatabaseError);
    match &result {
        Ok(_) => info!("Database migrations completed in {:?}", start.elapsed()),
        Err(e) => error!("Database migrations failed after {:?}: {}", start.elapsed(), e),
    }
    result
}

/// Classifies backend errors that mean "lost a row-lock race": deadlocks,
/// serialization failures and lock timeouts. These map to
/// `RetryableConflict`; everything else is a hard fault.
pub fn is_retryable(err: &DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("deadlock")
        || msg.contains("could not serialize")
        || msg.contains("lock timeout")
        || msg.contains("lock wait timeout")
        || msg.contains("database is locked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_errors_are_retryable() {
        let err = DbErr::Custom("deadlock detected".into());
        assert!(is_retryable(&err));
    }

    #[test]
    fn constraint_errors_are_not_retryable() {
        let err = DbErr::Custom("UNIQUE constraint failed: stock_movements.idempotency_key".into());
        assert!(!is_retryable(&err));
    }
}
