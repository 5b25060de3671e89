//! Repository implementations for SQLite storage
//!
//! All timestamps are stored as unix milliseconds.

pub mod idempotency;
pub mod lockout;
pub mod session;

pub use idempotency::SqliteIdempotencyRepository;
pub use lockout::SqliteLockoutRepository;
pub use session::SqliteSessionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_core::{
    Error,
    error::StorageError,
    repositories::{
        IdempotencyRepositoryProvider, LockoutRepositoryProvider, RepositoryProvider,
        SessionRepositoryProvider,
    },
};
use rampart_migration::MigrationManager;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::migrations::{self, SqliteMigrationManager};

/// Repository provider implementation for SQLite
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    lockout: Arc<SqliteLockoutRepository>,
    idempotency: Arc<SqliteIdempotencyRepository>,
    session: Arc<SqliteSessionRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let lockout = Arc::new(SqliteLockoutRepository::new(pool.clone()));
        let idempotency = Arc::new(SqliteIdempotencyRepository::new(pool.clone()));
        let session = Arc::new(SqliteSessionRepository::new(pool.clone()));

        Self {
            pool,
            lockout,
            idempotency,
            session,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl LockoutRepositoryProvider for SqliteRepositoryProvider {
    type LockoutRepo = SqliteLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo {
        &self.lockout
    }
}

impl IdempotencyRepositoryProvider for SqliteRepositoryProvider {
    type IdempotencyRepo = SqliteIdempotencyRepository;

    fn idempotency(&self) -> &Self::IdempotencyRepo {
        &self.idempotency
    }
}

impl SessionRepositoryProvider for SqliteRepositoryProvider {
    type SessionRepo = SqliteSessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        &self.session
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&migrations::all()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::Storage(StorageError::Database(format!(
            "Invalid stored timestamp {millis}"
        )))
    })
}

pub(crate) fn from_millis_opt(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, Error> {
    millis.map(from_millis).transpose()
}

/// A migrated in-memory database behind a single connection.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create pool");
    SqliteRepositoryProvider::new(pool.clone())
        .migrate()
        .await
        .expect("Failed to migrate");
    pool
}
