use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_core::{
    Error,
    error::StorageError,
    repositories::IdempotencyRepository,
    storage::{
        CachedResponse, CallerScope, IdempotencyKey, IdempotencyRecord, InsertOutcome,
        RequestFingerprint,
    },
};
use sqlx::SqlitePool;

use super::from_millis;

pub struct SqliteIdempotencyRepository {
    pool: SqlitePool,
}

impl SqliteIdempotencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteIdempotencyRecord {
    idempotency_key: String,
    caller_scope: String,
    request_method: String,
    request_path: String,
    request_params: String,
    response_status: i64,
    response_body: Vec<u8>,
    response_content_type: Option<String>,
    created_at: i64,
    expires_at: i64,
}

impl TryFrom<SqliteIdempotencyRecord> for IdempotencyRecord {
    type Error = Error;

    fn try_from(row: SqliteIdempotencyRecord) -> Result<Self, Self::Error> {
        let status = u16::try_from(row.response_status).map_err(|_| {
            StorageError::Database(format!(
                "Stored response status {} is out of range",
                row.response_status
            ))
        })?;

        Ok(IdempotencyRecord {
            key: IdempotencyKey::parse(&row.idempotency_key)?,
            caller_scope: CallerScope::new(row.caller_scope),
            request: RequestFingerprint::new(
                row.request_method,
                row.request_path,
                row.request_params,
            ),
            response: CachedResponse {
                status,
                body: row.response_body,
                content_type: row.response_content_type,
            },
            created_at: from_millis(row.created_at)?,
            expires_at: from_millis(row.expires_at)?,
        })
    }
}

#[async_trait]
impl IdempotencyRepository for SqliteIdempotencyRepository {
    async fn find(
        &self,
        key: &IdempotencyKey,
        scope: &CallerScope,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteIdempotencyRecord>(
            r#"
            SELECT idempotency_key, caller_scope, request_method, request_path, request_params,
                   response_status, response_body, response_content_type, created_at, expires_at
            FROM idempotency_records
            WHERE idempotency_key = ? AND caller_scope = ? AND expires_at > ?
            "#,
        )
        .bind(key.as_str())
        .bind(scope.as_str())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get idempotency record");
            StorageError::Database("Failed to get idempotency record".to_string())
        })?;

        row.map(IdempotencyRecord::try_from).transpose()
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome, Error> {
        // The update branch only fires over an expired row; a live row makes
        // the statement a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                idempotency_key, caller_scope, request_method, request_path, request_params,
                response_status, response_body, response_content_type, created_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (idempotency_key, caller_scope) DO UPDATE SET
                request_method = excluded.request_method,
                request_path = excluded.request_path,
                request_params = excluded.request_params,
                response_status = excluded.response_status,
                response_body = excluded.response_body,
                response_content_type = excluded.response_content_type,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            WHERE idempotency_records.expires_at <= excluded.created_at
            "#,
        )
        .bind(record.key.as_str())
        .bind(record.caller_scope.as_str())
        .bind(&record.request.method)
        .bind(&record.request.path)
        .bind(&record.request.params)
        .bind(i64::from(record.response.status))
        .bind(&record.response.body)
        .bind(&record.response.content_type)
        .bind(record.created_at.timestamp_millis())
        .bind(record.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to store idempotency record");
            StorageError::Database("Failed to store idempotency record".to_string())
        })?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE rowid IN (
                SELECT rowid FROM idempotency_records WHERE expires_at <= ? LIMIT ?
            )
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to delete expired idempotency records");
            StorageError::Database("Failed to delete expired idempotency records".to_string())
        })?;

        Ok(result.rows_affected())
    }
}
