//! Schema migration contracts shared by the rampart storage backends.
//!
//! A backend defines its schema as an ordered list of [`Migration`]s and
//! applies them through a [`MigrationManager`], which records every applied
//! version in a tracking table.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Duplicate migration version {0}")]
    DuplicateVersion(i64),
    #[error("Migrations out of order: {previous} is listed before {next}")]
    OutOfOrder { previous: i64, next: i64 },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Execute the migration
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Rollback the migration
    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;
}

/// A row of the tracking table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix milliseconds
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_rampart_migrations"
    }

    /// Initialize migration tracking table
    async fn initialize(&self) -> Result<()>;

    /// Apply pending migrations
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Rollback migrations
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Get list of applied migrations
    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    /// Check if specific migration was applied
    async fn is_applied(&self, version: i64) -> Result<bool>;
}

/// Check that versions are unique and strictly ascending.
pub fn validate_order<DB: Database>(migrations: &[Box<dyn Migration<DB>>]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut previous: Option<i64> = None;
    for migration in migrations {
        let version = migration.version();
        if !seen.insert(version) {
            return Err(MigrationError::DuplicateVersion(version));
        }
        if let Some(previous) = previous.filter(|p| *p > version) {
            return Err(MigrationError::OutOfOrder {
                previous,
                next: version,
            });
        }
        previous = Some(version);
    }
    Ok(())
}

/// Migrations whose version is not in `applied`, in list order.
pub fn pending<'m, DB: Database>(
    migrations: &'m [Box<dyn Migration<DB>>],
    applied: &[MigrationRecord],
) -> Vec<&'m dyn Migration<DB>> {
    let applied: HashSet<i64> = applied.iter().map(|r| r.version).collect();
    migrations
        .iter()
        .filter(|m| !applied.contains(&m.version()))
        .map(|m| m.as_ref())
        .collect()
}
