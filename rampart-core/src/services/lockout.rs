//! Durable account lockout.
//!
//! Failed authentication attempts are counted per account identifier in the
//! durable store, so the count survives restarts and is shared by every
//! instance behind the same database. Once an account reaches the configured
//! threshold it is locked for `lockout_duration`, and authentication is
//! rejected regardless of whether the credentials are correct.
//!
//! # Failure policy
//!
//! Lockout fails **closed**: if the store errors or does not answer within
//! `store_timeout`, [`LockoutService::is_locked`] reports the account as
//! locked.
//!
//! # Example
//!
//! ```rust,ignore
//! let check = lockout
//!     .verify_credentials("alice@example.com", Some("203.0.113.7"), async {
//!         passwords.verify(&email, &password).await
//!     })
//!     .await?;
//!
//! if !check.is_verified() {
//!     return Err(DefenseError::AccountLocked.into()); // same 401 either way
//! }
//! ```

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    Error,
    clock::Clock,
    config::LockoutConfig,
    error::utilities::with_store_timeout,
    events::{Event, EventBus, UnlockReason, publish},
    repositories::{LockoutRepository, SessionRepository},
    storage::{FailurePolicy, LockoutRecord, LockoutStatus, UnlockOutcome, normalize_identifier},
};

/// Outcome of [`LockoutService::verify_credentials`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    /// Credentials were correct and the account is not locked
    Verified,
    /// Credentials were wrong; the failure has been recorded
    InvalidCredentials { failed_attempts: u32, locked: bool },
    /// The account was locked, credentials were not checked
    Locked { locked_until: Option<DateTime<Utc>> },
}

impl CredentialCheck {
    pub fn is_verified(&self) -> bool {
        matches!(self, CredentialCheck::Verified)
    }
}

/// Service for durable per-account lockout.
///
/// # Thread Safety
///
/// The service is shareable across tasks. Concurrency control lives in the
/// repository, whose `record_failure` is a single atomic statement.
pub struct LockoutService<R: LockoutRepository, S: SessionRepository> {
    repository: Arc<R>,
    sessions: Arc<S>,
    config: LockoutConfig,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
}

impl<R: LockoutRepository, S: SessionRepository> LockoutService<R, S> {
    pub fn new(
        repository: Arc<R>,
        sessions: Arc<S>,
        config: LockoutConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            sessions,
            config,
            clock,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy {
            threshold: self.config.max_failed_attempts,
            lockout_duration: self.config.lockout_duration,
            attempt_window: self.config.attempt_window,
        }
    }

    /// Current lockout state of an account.
    ///
    /// Unlike [`is_locked`](Self::is_locked) this surfaces store errors.
    pub async fn status(&self, identifier: &str) -> Result<LockoutStatus, Error> {
        let identifier = normalize_identifier(identifier)?;
        if !self.config.enabled {
            return Ok(LockoutStatus::unlocked(&identifier));
        }

        let now = self.clock.now();
        let record = with_store_timeout(
            self.config.store_timeout,
            self.repository.find(&identifier),
        )
        .await?;

        Ok(record
            .map(|r| LockoutStatus::from_record(&r, now))
            .unwrap_or_else(|| LockoutStatus::unlocked(&identifier)))
    }

    /// Whether authentication for this account must be rejected right now.
    ///
    /// Returns `true` when the store cannot be consulted.
    pub async fn is_locked(&self, identifier: &str) -> bool {
        self.lock_state(identifier).await.0
    }

    async fn lock_state(&self, identifier: &str) -> (bool, Option<DateTime<Utc>>) {
        match self.status(identifier).await {
            Ok(status) => (status.is_locked, status.locked_until),
            Err(Error::Validation(e)) => {
                tracing::debug!(error = %e, "Rejected malformed account identifier");
                (false, None)
            }
            Err(e) => {
                tracing::error!(
                    target: "rampart::security",
                    identifier = %identifier,
                    error = %e,
                    timeout_ms = self.config.store_timeout.as_millis() as u64,
                    "Lockout store unavailable, treating account as locked"
                );
                (true, None)
            }
        }
    }

    /// Record a failed authentication attempt.
    ///
    /// # Returns
    ///
    /// The lockout status after the failure has been applied.
    pub async fn record_failure(
        &self,
        identifier: &str,
        ip_address: Option<&str>,
    ) -> Result<LockoutStatus, Error> {
        let identifier = normalize_identifier(identifier)?;
        if !self.config.enabled {
            return Ok(LockoutStatus::unlocked(&identifier));
        }

        let now = self.clock.now();
        let policy = self.policy();
        let record = with_store_timeout(
            self.config.store_timeout,
            self.repository.record_failure(&identifier, now, policy),
        )
        .await?;

        publish(
            self.events.as_ref(),
            Event::LoginFailed {
                identifier: identifier.clone(),
                failed_attempts: record.failed_attempts,
                ip_address: ip_address.map(str::to_string),
                timestamp: now,
            },
        )
        .await;

        if let Some(locked_until) = newly_locked(&record, now, &policy) {
            tracing::warn!(
                target: "rampart::security",
                identifier = %identifier,
                failed_attempts = record.failed_attempts,
                locked_until = %locked_until,
                ip_address = ?ip_address,
                "Account locked after repeated authentication failures"
            );
            publish(
                self.events.as_ref(),
                Event::AccountLocked {
                    identifier: identifier.clone(),
                    failed_attempts: record.failed_attempts,
                    locked_until,
                    ip_address: ip_address.map(str::to_string),
                    timestamp: now,
                },
            )
            .await;
        }

        Ok(LockoutStatus::from_record(&record, now))
    }

    /// Clear the failure count after a successful authentication.
    pub async fn record_success(&self, identifier: &str) -> Result<(), Error> {
        let identifier = normalize_identifier(identifier)?;
        if !self.config.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let previous = with_store_timeout(
            self.config.store_timeout,
            self.repository.reset(&identifier, now),
        )
        .await?;

        if previous.is_some_and(|p| p.locked_until.is_some()) {
            publish(
                self.events.as_ref(),
                Event::AccountUnlocked {
                    identifier,
                    reason: UnlockReason::SuccessfulLogin,
                    actor: None,
                    timestamp: now,
                },
            )
            .await;
        }
        Ok(())
    }

    /// Check credentials only if the account is not locked, and record the
    /// outcome.
    ///
    /// When the account is locked, `credentials` is dropped without being
    /// polled, so no password hash is computed for a locked account.
    pub async fn verify_credentials<F>(
        &self,
        identifier: &str,
        ip_address: Option<&str>,
        credentials: F,
    ) -> Result<CredentialCheck, Error>
    where
        F: Future<Output = Result<bool, Error>>,
    {
        let (locked, locked_until) = self.lock_state(identifier).await;
        if locked {
            tracing::info!(
                target: "rampart::security",
                identifier = %identifier,
                ip_address = ?ip_address,
                "Authentication attempt against locked account"
            );
            return Ok(CredentialCheck::Locked { locked_until });
        }

        if credentials.await? {
            if let Err(e) = self.record_success(identifier).await {
                tracing::warn!(identifier = %identifier, error = %e, "Failed to reset lockout counter");
            }
            return Ok(CredentialCheck::Verified);
        }

        match self.record_failure(identifier, ip_address).await {
            Ok(status) => Ok(CredentialCheck::InvalidCredentials {
                failed_attempts: status.failed_attempts,
                locked: status.is_locked,
            }),
            Err(e) => {
                tracing::error!(
                    target: "rampart::security",
                    identifier = %identifier,
                    error = %e,
                    "Failed to record authentication failure"
                );
                Ok(CredentialCheck::InvalidCredentials {
                    failed_attempts: 0,
                    locked: false,
                })
            }
        }
    }

    /// Administrative unlock.
    ///
    /// Revokes every session of the account, then clears the failure state in
    /// one update. The lock is only lifted once the sessions are gone, so a
    /// failed revocation leaves the account locked. Works whether or not
    /// lockout tracking is enabled.
    pub async fn unlock(&self, identifier: &str, actor: &str) -> Result<UnlockOutcome, Error> {
        let identifier = normalize_identifier(identifier)?;
        let now = self.clock.now();

        let revoked_sessions = with_store_timeout(
            self.config.store_timeout,
            self.sessions.revoke_all(&identifier),
        )
        .await
        .inspect_err(|e| {
            tracing::error!(
                target: "rampart::security",
                identifier = %identifier,
                actor = %actor,
                error = %e,
                "Unlock aborted, sessions could not be revoked"
            );
        })?;

        let previous = with_store_timeout(
            self.config.store_timeout,
            self.repository.reset(&identifier, now),
        )
        .await
        .inspect_err(|e| {
            tracing::error!(
                target: "rampart::security",
                identifier = %identifier,
                actor = %actor,
                revoked_sessions = revoked_sessions.len(),
                error = %e,
                "Unlock failed after revoking sessions, account remains locked"
            );
        })?;
        let was_locked = previous.as_ref().is_some_and(|p| p.is_locked_at(now));

        tracing::warn!(
            target: "rampart::security",
            identifier = %identifier,
            actor = %actor,
            was_locked,
            revoked_sessions = revoked_sessions.len(),
            "Account unlocked by administrator"
        );
        publish(
            self.events.as_ref(),
            Event::AccountUnlocked {
                identifier: identifier.clone(),
                reason: UnlockReason::AdminAction,
                actor: Some(actor.to_string()),
                timestamp: now,
            },
        )
        .await;

        Ok(UnlockOutcome {
            identifier,
            was_locked,
            revoked_sessions,
        })
    }

    /// Delete unlocked records untouched for longer than the retention period.
    pub async fn purge_stale(&self) -> Result<u64, Error> {
        let now = self.clock.now();
        let before = now - self.config.retention_period;
        let purged = with_store_timeout(
            self.config.store_timeout,
            self.repository.purge_stale(now, before),
        )
        .await?;
        if purged > 0 {
            tracing::info!(count = purged, "Purged stale lockout records");
        }
        Ok(purged)
    }
}

/// `Some(locked_until)` if this failure is the one that set the lock.
fn newly_locked(
    record: &LockoutRecord,
    now: DateTime<Utc>,
    policy: &FailurePolicy,
) -> Option<DateTime<Utc>> {
    // Stores keep millisecond precision.
    let expected = (now + policy.lockout_duration).timestamp_millis();
    record
        .locked_until
        .filter(|until| until.timestamp_millis() == expected)
}
