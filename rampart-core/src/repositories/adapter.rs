use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    repositories::{
        IdempotencyRepository, LockoutRepository, RepositoryProvider, SessionRepository,
    },
    storage::{
        CallerScope, FailurePolicy, IdempotencyKey, IdempotencyRecord, InsertOutcome,
        LockoutRecord, SessionRecord,
    },
};

/// Adapter that wraps a RepositoryProvider and implements individual repository traits
pub struct LockoutRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> LockoutRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> LockoutRepository for LockoutRepositoryAdapter<R> {
    async fn find(&self, identifier: &str) -> Result<Option<LockoutRecord>, Error> {
        self.provider.lockout().find(identifier).await
    }

    async fn record_failure(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
        policy: FailurePolicy,
    ) -> Result<LockoutRecord, Error> {
        self.provider
            .lockout()
            .record_failure(identifier, now, policy)
            .await
    }

    async fn reset(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LockoutRecord>, Error> {
        self.provider.lockout().reset(identifier, now).await
    }

    async fn purge_stale(&self, now: DateTime<Utc>, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.lockout().purge_stale(now, before).await
    }
}

pub struct IdempotencyRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> IdempotencyRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> IdempotencyRepository for IdempotencyRepositoryAdapter<R> {
    async fn find(
        &self,
        key: &IdempotencyKey,
        scope: &CallerScope,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, Error> {
        self.provider.idempotency().find(key, scope, now).await
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome, Error> {
        self.provider.idempotency().insert(record).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64, Error> {
        self.provider.idempotency().delete_expired(now, limit).await
    }
}

pub struct SessionRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SessionRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SessionRepository for SessionRepositoryAdapter<R> {
    async fn create(&self, session: SessionRecord) -> Result<SessionRecord, Error> {
        self.provider.session().create(session).await
    }

    async fn revoke_all(&self, identifier: &str) -> Result<Vec<String>, Error> {
        self.provider.session().revoke_all(identifier).await
    }

    async fn count_active(&self, identifier: &str, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.session().count_active(identifier, now).await
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.session().cleanup_expired(now).await
    }
}
