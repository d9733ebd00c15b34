//! Database connection and unit-of-work handling
//!
//! Every data-access method in this crate takes the unit of work
//! (`&DatabaseTransaction`) it should run in and never commits on its
//! own. Whoever calls [`Database::begin`] owns the transaction and ends
//! it with [`settle`].

use anyhow::{anyhow, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, PaginatorTrait, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::entity::object;

/// Catalog database connection wrapper
#[derive(Clone)]
pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    /// Wrap an already established connection
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Get a reference to the database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn backend(&self) -> DbBackend {
        self.connection.get_database_backend()
    }

    /// Create a new database connection with pool settings suited to the backend
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to catalog database...");

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_secs(2);

        loop {
            attempts += 1;

            let mut opt = ConnectOptions::new(database_url.to_string());
            if database_url.starts_with("sqlite:") {
                // A second pooled connection to an in-memory database is a different database
                opt.max_connections(1).min_connections(1);
            } else {
                opt
                    .max_connections(50)
                    .min_connections(5)
                    .idle_timeout(Duration::from_secs(300))
                    .max_lifetime(Duration::from_secs(3600));
            }
            opt
                .connect_timeout(Duration::from_secs(10))
                .acquire_timeout(Duration::from_secs(30))
                .sqlx_logging(true)
                .sqlx_slow_statements_logging_settings(
                    tracing::log::LevelFilter::Warn,
                    Duration::from_millis(500),
                );

            match SeaOrmDatabase::connect(opt).await {
                Ok(connection) => {
                    info!(
                        "Connected to catalog database ({:?})",
                        connection.get_database_backend()
                    );
                    return Ok(Self { connection });
                }
                Err(e) if attempts < MAX_ATTEMPTS => {
                    warn!(
                        "Failed to connect to database (attempt {}/{}): {}",
                        attempts, MAX_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    error!("Failed to connect to database after {} attempts", MAX_ATTEMPTS);
                    return Err(anyhow!("Database connection failed: {}", e));
                }
            }
        }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let _ = object::Entity::find()
            .paginate(&self.connection, 1)
            .fetch_page(0)
            .await
            .map_err(|e| anyhow!("Health check failed: {}", e))?;
        Ok(())
    }

    /// Begin a unit of work owned by the caller
    pub async fn begin(&self) -> std::result::Result<DatabaseTransaction, DbErr> {
        self.connection.begin().await
    }
}

/// End a caller-owned unit of work: commit on success, roll back on failure.
///
/// A commit failure is reported as the operation's failure.
pub async fn settle<T, E>(txn: DatabaseTransaction, outcome: std::result::Result<T, E>) -> std::result::Result<T, E>
where
    E: From<DbErr> + std::fmt::Display,
{
    match outcome {
        Ok(value) => {
            txn.commit().await?;
            debug!("Unit of work committed");
            Ok(value)
        }
        Err(e) => {
            error!("Unit of work failed, rolling back: {}", e);
            if let Err(rollback_err) = txn.rollback().await {
                error!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::schema::create_schema;
    use sea_orm::{ActiveModelTrait, Set};
    use uuid::Uuid;

    async fn setup() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        create_schema(db.connection()).await.unwrap();
        db
    }

    fn new_object(id: Uuid) -> object::ActiveModel {
        let now = chrono::Utc::now();
        object::ActiveModel {
            id: Set(id),
            path: Set(format!("bucket/{}", id)),
            name: Set(None),
            public: Set(false),
            active: Set(true),
            created_by: Set(Uuid::nil()),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }

    #[tokio::test]
    async fn test_database_connection() {
        let db = setup().await;
        assert!(db.health_check().await.is_ok());
        assert_eq!(db.backend(), DbBackend::Sqlite);
    }

    #[tokio::test]
    async fn test_settle_commits_on_success() {
        let db = setup().await;
        let id = Uuid::new_v4();

        let txn = db.begin().await.unwrap();
        let outcome: std::result::Result<(), CatalogError> =
            new_object(id).insert(&txn).await.map(|_| ()).map_err(Into::into);
        settle(txn, outcome).await.unwrap();

        let found = object::Entity::find_by_id(id).one(db.connection()).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_settle_rolls_back_on_failure() {
        let db = setup().await;
        let id = Uuid::new_v4();

        let txn = db.begin().await.unwrap();
        new_object(id).insert(&txn).await.unwrap();
        let outcome: std::result::Result<(), CatalogError> =
            Err(CatalogError::VersionNotFound(Uuid::nil()));
        assert!(settle(txn, outcome).await.is_err());

        let found = object::Entity::find_by_id(id).one(db.connection()).await.unwrap();
        assert!(found.is_none());
    }
}
