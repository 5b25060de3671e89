use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_core::{
    Error,
    crypto::hash_token,
    error::StorageError,
    repositories::SessionRepository,
    storage::{SessionRecord, normalize_identifier},
};
use sqlx::SqlitePool;

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(&self, session: SessionRecord) -> Result<SessionRecord, Error> {
        let identifier = normalize_identifier(&session.identifier)?;

        // Store the hash, not the plaintext id
        sqlx::query(
            r#"
            INSERT INTO sessions (id, identifier, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(hash_token(&session.id))
        .bind(&identifier)
        .bind(session.created_at.timestamp_millis())
        .bind(session.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create session");
            StorageError::Database("Failed to create session".to_string())
        })?;

        Ok(SessionRecord {
            identifier,
            ..session
        })
    }

    async fn revoke_all(&self, identifier: &str) -> Result<Vec<String>, Error> {
        let revoked: Vec<String> =
            sqlx::query_scalar("DELETE FROM sessions WHERE identifier = ?1 RETURNING id")
                .bind(identifier)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to revoke sessions");
                    StorageError::Database("Failed to revoke sessions".to_string())
                })?;

        Ok(revoked)
    }

    async fn count_active(&self, identifier: &str, now: DateTime<Utc>) -> Result<u64, Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE identifier = ?1 AND expires_at > ?2",
        )
        .bind(identifier)
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to count sessions");
            StorageError::Database("Failed to count sessions".to_string())
        })?;

        Ok(count.max(0) as u64)
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to cleanup expired sessions");
                StorageError::Database("Failed to cleanup expired sessions".to_string())
            })?;

        Ok(result.rows_affected())
    }
}
