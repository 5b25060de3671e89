use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, storage::SessionRecord};

/// Repository for the platform's sessions, as far as lockout needs them
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Create a new session
    async fn create(&self, session: SessionRecord) -> Result<SessionRecord, Error>;

    /// Delete every session of an identifier, returning the stored session
    /// id hashes that were removed
    async fn revoke_all(&self, identifier: &str) -> Result<Vec<String>, Error>;

    /// Count sessions of an identifier that have not expired
    async fn count_active(&self, identifier: &str, now: DateTime<Utc>) -> Result<u64, Error>;

    /// Clean up expired sessions
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}
