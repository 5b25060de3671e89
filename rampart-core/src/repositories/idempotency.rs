use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{CallerScope, IdempotencyKey, IdempotencyRecord, InsertOutcome},
};

/// Repository for stored idempotent responses
#[async_trait]
pub trait IdempotencyRepository: Send + Sync + 'static {
    /// Find the live (unexpired) record for a key within a caller scope
    async fn find(
        &self,
        key: &IdempotencyKey,
        scope: &CallerScope,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, Error>;

    /// Insert a record, or report that a live one already holds the identity.
    ///
    /// An expired record with the same identity is replaced.
    async fn insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome, Error>;

    /// Delete up to `limit` expired records, returning how many were removed
    async fn delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64, Error>;
}
