//! SQLite implementation of the lockout repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_core::{
    Error,
    error::StorageError,
    repositories::LockoutRepository,
    storage::{FailurePolicy, LockoutRecord},
};
use sqlx::SqlitePool;

use super::{from_millis, from_millis_opt};

/// SQLite repository for durable lockout counters.
pub struct SqliteLockoutRepository {
    pool: SqlitePool,
}

impl SqliteLockoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteLockoutRecord {
    identifier: String,
    failed_attempts: i64,
    last_failed_at: Option<i64>,
    locked_until: Option<i64>,
    is_active: bool,
    updated_at: i64,
}

impl TryFrom<SqliteLockoutRecord> for LockoutRecord {
    type Error = Error;

    fn try_from(row: SqliteLockoutRecord) -> Result<Self, Self::Error> {
        Ok(LockoutRecord {
            identifier: row.identifier,
            failed_attempts: u32::try_from(row.failed_attempts).unwrap_or(u32::MAX),
            last_failed_at: from_millis_opt(row.last_failed_at)?,
            locked_until: from_millis_opt(row.locked_until)?,
            is_active: row.is_active,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

const COLUMNS: &str = "identifier, failed_attempts, last_failed_at, locked_until, is_active, updated_at";

// A failure restarts the count when the previous lock has expired, or when
// there is no lock and the last failure fell out of the attempt window. An
// active lock is kept as is. Column references inside SET see the row as it
// was before the update.
const RECORD_FAILURE: &str = r#"
    INSERT INTO lockouts (identifier, failed_attempts, last_failed_at, locked_until, is_active, updated_at)
    VALUES (?1, 1, ?2, CASE WHEN 1 >= ?3 THEN ?2 + ?4 ELSE NULL END, 1, ?2)
    ON CONFLICT (identifier) DO UPDATE SET
        failed_attempts = CASE
            WHEN lockouts.locked_until > ?2 THEN lockouts.failed_attempts + 1
            WHEN lockouts.locked_until IS NOT NULL THEN 1
            WHEN lockouts.last_failed_at IS NULL OR lockouts.last_failed_at + ?5 <= ?2 THEN 1
            ELSE lockouts.failed_attempts + 1
        END,
        locked_until = CASE
            WHEN lockouts.locked_until > ?2 THEN lockouts.locked_until
            WHEN lockouts.locked_until IS NOT NULL
                OR lockouts.last_failed_at IS NULL
                OR lockouts.last_failed_at + ?5 <= ?2
                THEN CASE WHEN 1 >= ?3 THEN ?2 + ?4 ELSE NULL END
            WHEN lockouts.failed_attempts + 1 >= ?3 THEN ?2 + ?4
            ELSE NULL
        END,
        last_failed_at = ?2,
        updated_at = ?2
    RETURNING identifier, failed_attempts, last_failed_at, locked_until, is_active, updated_at
"#;

#[async_trait]
impl LockoutRepository for SqliteLockoutRepository {
    async fn find(&self, identifier: &str) -> Result<Option<LockoutRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteLockoutRecord>(&format!(
            "SELECT {COLUMNS} FROM lockouts WHERE identifier = ?"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get lockout record");
            StorageError::Database("Failed to get lockout record".to_string())
        })?;

        row.map(LockoutRecord::try_from).transpose()
    }

    async fn record_failure(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
        policy: FailurePolicy,
    ) -> Result<LockoutRecord, Error> {
        let row = sqlx::query_as::<_, SqliteLockoutRecord>(RECORD_FAILURE)
            .bind(identifier)
            .bind(now.timestamp_millis())
            .bind(i64::from(policy.threshold))
            .bind(policy.lockout_duration.num_milliseconds())
            .bind(policy.attempt_window.num_milliseconds())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to record authentication failure");
                StorageError::Database("Failed to record authentication failure".to_string())
            })?;

        row.try_into()
    }

    async fn reset(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LockoutRecord>, Error> {
        let db_err = |e: sqlx::Error| {
            tracing::error!(error = %e, "Failed to reset lockout record");
            Error::Storage(StorageError::Database(
                "Failed to reset lockout record".to_string(),
            ))
        };

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let previous = sqlx::query_as::<_, SqliteLockoutRecord>(&format!(
            "SELECT {COLUMNS} FROM lockouts WHERE identifier = ?"
        ))
        .bind(identifier)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if previous.is_some() {
            sqlx::query(
                r#"
                UPDATE lockouts
                SET failed_attempts = 0, last_failed_at = NULL, locked_until = NULL, updated_at = ?
                WHERE identifier = ?
                "#,
            )
            .bind(now.timestamp_millis())
            .bind(identifier)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        previous.map(LockoutRecord::try_from).transpose()
    }

    async fn purge_stale(&self, now: DateTime<Utc>, before: DateTime<Utc>) -> Result<u64, Error> {
        // Rows with an active lock are never purged.
        let result = sqlx::query(
            r#"
            DELETE FROM lockouts
            WHERE (locked_until IS NULL OR locked_until <= ?)
            AND updated_at < ?
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(before.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to purge stale lockout records");
            StorageError::Database("Failed to purge stale lockout records".to_string())
        })?;

        Ok(result.rows_affected())
    }
}
