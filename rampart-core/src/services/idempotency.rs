//! Idempotency-key deduplication for state-changing requests.
//!
//! A request carrying a key that was already served within the TTL gets the
//! stored response back and the handler does not run again. Keys are always
//! looked up within a [`CallerScope`], so one caller can never replay another
//! caller's response.
//!
//! The guarantee is one observed response, not one execution of every side
//! effect. A handler that calls an external system (a payment gateway, say)
//! should forward the key to that system's own idempotency support.
//!
//! # Consistency
//!
//! On one instance, concurrent calls with the same `(key, scope)` are
//! serialised and the handler runs once. Across instances the store's
//! uniqueness constraint arbitrates: the losing insert discards its own
//! result and returns the stored one.
//!
//! # Failure policy
//!
//! The guard fails **open**. If the lookup errors or times out the handler
//! runs unprotected and nothing is stored; store-phase failures are logged
//! and swallowed.

use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Error,
    clock::Clock,
    config::IdempotencyConfig,
    crypto::keyed_digest,
    error::utilities::with_store_timeout,
    events::{Event, EventBus, publish},
    repositories::IdempotencyRepository,
    storage::{
        CachedResponse, CallerScope, IdempotencyKey, IdempotencyRecord, InsertOutcome,
        RequestFingerprint,
    },
};

/// Response returned by [`IdempotencyService::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdempotentResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// `true` when the response came from the store
    pub replayed: bool,
}

impl IdempotentResponse {
    fn fresh(response: CachedResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
            content_type: response.content_type,
            replayed: false,
        }
    }

    fn replay(record: IdempotencyRecord) -> Self {
        Self {
            status: record.response.status,
            body: record.response.body,
            content_type: record.response.content_type,
            replayed: true,
        }
    }
}

type SlotKey = (IdempotencyKey, CallerScope);

/// Holds the per-identity mutex for the duration of one execution.
struct InFlight<'a> {
    slots: &'a DashMap<SlotKey, Arc<Mutex<()>>>,
    key: SlotKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

pub struct IdempotencyService<R: IdempotencyRepository> {
    repository: Arc<R>,
    config: IdempotencyConfig,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    in_flight: DashMap<SlotKey, Arc<Mutex<()>>>,
}

impl<R: IdempotencyRepository> IdempotencyService<R> {
    pub fn new(repository: Arc<R>, config: IdempotencyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            config,
            clock,
            events: None,
            in_flight: DashMap::new(),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Derive a key for a request that did not carry one.
    ///
    /// The key is an HMAC of the method, path, query string, body and caller
    /// scope under the server secret, so identical retries map to the same key.
    pub fn derive_key(
        &self,
        request: &RequestFingerprint,
        body: &[u8],
        scope: &CallerScope,
    ) -> Result<IdempotencyKey, Error> {
        let digest = keyed_digest(
            &self.config.secret,
            &[
                request.method.as_bytes(),
                request.path.as_bytes(),
                request.params.as_bytes(),
                body,
                scope.as_str().as_bytes(),
            ],
        )?;
        Ok(IdempotencyKey::derived(digest))
    }

    /// Run `handler` at most once per `(key, scope)` within the TTL.
    pub async fn execute<F, Fut>(
        &self,
        key: &IdempotencyKey,
        scope: &CallerScope,
        request: &RequestFingerprint,
        handler: F,
    ) -> IdempotentResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedResponse>,
    {
        let _in_flight = self.acquire(key, scope).await;

        let now = self.clock.now();
        let lookup = with_store_timeout(
            self.config.store_timeout,
            self.repository.find(key, scope, now),
        )
        .await;

        let store = match lookup {
            Ok(Some(record)) => return self.replay(record, request).await,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    caller_scope = %scope,
                    error = %e,
                    "Idempotency lookup failed, running handler unprotected"
                );
                false
            }
        };

        let response = handler().await;
        if !store || !response.is_success() {
            return IdempotentResponse::fresh(response);
        }

        let record = IdempotencyRecord {
            key: key.clone(),
            caller_scope: scope.clone(),
            request: request.clone(),
            response,
            created_at: now,
            expires_at: now + self.config.ttl,
        };

        let inserted =
            with_store_timeout(self.config.store_timeout, self.repository.insert(&record)).await;
        match inserted {
            Ok(InsertOutcome::Inserted) => IdempotentResponse::fresh(record.response),
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::debug!(
                    key = %key,
                    caller_scope = %scope,
                    "Lost idempotency insert race, returning stored response"
                );
                let stored = with_store_timeout(
                    self.config.store_timeout,
                    self.repository.find(key, scope, self.clock.now()),
                )
                .await;
                match stored {
                    Ok(Some(stored)) => self.replay(stored, request).await,
                    Ok(None) => IdempotentResponse::fresh(record.response),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to re-read idempotency record");
                        IdempotentResponse::fresh(record.response)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    caller_scope = %scope,
                    error = %e,
                    "Failed to store idempotent response"
                );
                IdempotentResponse::fresh(record.response)
            }
        }
    }

    async fn acquire(&self, key: &IdempotencyKey, scope: &CallerScope) -> InFlight<'_> {
        let slot_key = (key.clone(), scope.clone());
        let slot = self.in_flight.entry(slot_key.clone()).or_default().clone();
        let guard = slot.lock_owned().await;
        InFlight {
            slots: &self.in_flight,
            key: slot_key,
            guard: Some(guard),
        }
    }

    async fn replay(
        &self,
        record: IdempotencyRecord,
        request: &RequestFingerprint,
    ) -> IdempotentResponse {
        if record.request.method != request.method || record.request.path != request.path {
            tracing::warn!(
                target: "rampart::security",
                key = %record.key,
                caller_scope = %record.caller_scope,
                stored_method = %record.request.method,
                stored_path = %record.request.path,
                method = %request.method,
                path = %request.path,
                "Idempotency key reused for a different request"
            );
        }

        publish(
            self.events.as_ref(),
            Event::IdempotentReplay {
                key: record.key.to_string(),
                caller_scope: record.caller_scope.to_string(),
                timestamp: self.clock.now(),
            },
        )
        .await;

        IdempotentResponse::replay(record)
    }

    /// Delete expired records in batches of `sweep_batch_size`.
    ///
    /// # Returns
    ///
    /// The total number of records deleted.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let batch = self.config.sweep_batch_size.max(1);
        let mut total = 0;
        loop {
            let deleted = with_store_timeout(
                self.config.store_timeout,
                self.repository.delete_expired(self.clock.now(), batch),
            )
            .await?;
            total += deleted;
            if deleted < u64::from(batch) {
                break;
            }
        }
        if total > 0 {
            tracing::info!(count = total, "Purged expired idempotency records");
        }
        Ok(total)
    }

    /// Number of identities currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
