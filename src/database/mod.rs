pub mod error;
pub mod memory;
pub mod models;
pub mod store;
pub mod transaction_repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info, warn};

use self::error::{DatabaseError, DatabaseErrorKind};
use crate::config::DatabaseConfig;

pub use memory::InMemoryTransactionStore;
pub use store::{StoreResult, TransactionStore, UnitOfWork};
pub use transaction_repository::PgTransactionStore;

const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(1800);

/// Opens the pool described by `config` and proves it with one acquire.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let acquire_timeout = Duration::from_secs(config.connection_timeout);
    let idle_timeout = Duration::from_secs(config.idle_timeout.unwrap_or(600));

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout = ?acquire_timeout,
        "Connecting to transaction database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(acquire_timeout)
        .idle_timeout(idle_timeout)
        .max_lifetime(MAX_CONNECTION_LIFETIME)
        .connect(&config.url)
        .await
        .map_err(|e| {
            log_error!(error = %e, "Transaction database unreachable");
            DatabaseError::from_sqlx(e)
        })?;

    ping(&pool).await?;
    Ok(pool)
}

/// Applies `migrations/` to the connected database.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        log_error!(error = %e, "Database migration failed");
        DatabaseError::new(DatabaseErrorKind::Query {
            message: e.to_string(),
        })
    })?;
    info!("Database migrations applied");
    Ok(())
}

pub async fn ping(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
        warn!(error = %e, "Transaction database ping failed");
        DatabaseError::from_sqlx(e)
    })?;
    Ok(())
}
