use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::migrations::Migrator;

pub type DbConn = DatabaseConnection;

/// Create a new database connection and run migrations using config
pub async fn connect() -> Result<DbConn> {
    connect_with_url(&CONFIG.database.database_url).await
}

/// Create a new database connection with a specific URL and run migrations
pub async fn connect_with_url(database_url: &str) -> Result<DbConn> {
    tracing::info!("Connecting to database...");

    let mut opts = ConnectOptions::new(database_url);
    opts.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let db = Database::connect(opts)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to connect to database: {}", e)))?;

    tracing::info!("Running database migrations...");
    Migrator::up(&db, None)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to run migrations: {}", e)))?;
    tracing::info!("Database migrations completed");

    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::prelude::*;
    use sea_orm::{EntityTrait, PaginatorTrait};

    #[tokio::test]
    async fn test_connect_runs_migrations_and_seed() {
        // A file database: every pooled connection must see the same schema
        let path = std::env::temp_dir().join(format!("elder-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = connect_with_url(&url).await.unwrap();

        assert_eq!(Role::find().count(&db).await.unwrap(), 3);
        assert_eq!(
            Permission::find().count(&db).await.unwrap() as usize,
            crate::middleware::ALL_PERMISSIONS.len()
        );
    }

    #[tokio::test]
    async fn test_connect_with_bad_url_fails() {
        let err = connect_with_url("nosuchdb://nowhere").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
