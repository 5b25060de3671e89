//! Records persisted or exchanged by the defense services.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest accepted account identifier (the RFC 5321 address limit).
pub const MAX_IDENTIFIER_LEN: usize = 320;

/// Longest accepted caller-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Normalise an account identifier so `Alice@Example.com ` and
/// `alice@example.com` share one lockout record.
pub fn normalize_identifier(raw: &str) -> Result<String, ValidationError> {
    let identifier = raw.trim().to_lowercase();
    if identifier.is_empty() {
        return Err(ValidationError::InvalidIdentifier(
            "identifier must not be empty".to_string(),
        ));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::InvalidIdentifier(format!(
            "identifier longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    Ok(identifier)
}

// ============================================================================
// Lockout
// ============================================================================

/// Durable failed-authentication state for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub identifier: String,
    pub failed_attempts: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Account activation flag. Lockout is temporal and never changes it.
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl LockoutRecord {
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// The record after one more failure at `now`.
    ///
    /// Backends that cannot express this as a single atomic statement must
    /// call it while holding a per-identifier lock.
    pub fn next_failure(
        previous: Option<&LockoutRecord>,
        identifier: &str,
        now: DateTime<Utc>,
        policy: FailurePolicy,
    ) -> LockoutRecord {
        let lock_for = |failed_attempts: u32| {
            (failed_attempts >= policy.threshold).then(|| now + policy.lockout_duration)
        };

        let continuing = previous.filter(|p| {
            if p.is_locked_at(now) {
                return true;
            }
            let lock_expired = p.locked_until.is_some();
            let window_passed = p
                .last_failed_at
                .is_none_or(|last| last + policy.attempt_window <= now);
            !lock_expired && !window_passed
        });

        let (failed_attempts, locked_until) = match continuing {
            Some(p) if p.is_locked_at(now) => (p.failed_attempts.saturating_add(1), p.locked_until),
            Some(p) => {
                let failed = p.failed_attempts.saturating_add(1);
                (failed, lock_for(failed))
            }
            None => (1, lock_for(1)),
        };

        LockoutRecord {
            identifier: identifier.to_string(),
            failed_attempts,
            last_failed_at: Some(now),
            locked_until,
            is_active: previous.is_none_or(|p| p.is_active),
            updated_at: now,
        }
    }
}

/// Parameters the store needs to apply one failure atomically.
#[derive(Debug, Clone, Copy)]
pub struct FailurePolicy {
    pub threshold: u32,
    pub lockout_duration: Duration,
    pub attempt_window: Duration,
}

/// Point-in-time view of an account's lockout state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutStatus {
    pub identifier: String,
    pub failed_attempts: u32,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    pub fn unlocked(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            failed_attempts: 0,
            is_locked: false,
            locked_until: None,
        }
    }

    pub fn from_record(record: &LockoutRecord, now: DateTime<Utc>) -> Self {
        let is_locked = record.is_locked_at(now);
        Self {
            identifier: record.identifier.clone(),
            failed_attempts: record.failed_attempts,
            is_locked,
            locked_until: if is_locked { record.locked_until } else { None },
        }
    }

    /// Whole seconds until the lock lifts, rounded up.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.locked_until
            .filter(|_| self.is_locked)
            .map(|until| seconds_until(until, now))
    }
}

/// Result of an administrative unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockOutcome {
    pub identifier: String,
    /// Whether a lock was active when the unlock ran
    pub was_locked: bool,
    /// Ids of the sessions that were revoked
    pub revoked_sessions: Vec<String>,
}

// ============================================================================
// Idempotency
// ============================================================================

/// A validated idempotency key, caller-supplied or server-derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate a caller-supplied key: 1 to 255 visible ASCII characters.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let key = raw.trim();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ValidationError::InvalidIdempotencyKey(format!(
                "length must be between 1 and {MAX_IDEMPOTENCY_KEY_LEN}"
            )));
        }
        if !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ValidationError::InvalidIdempotencyKey(
                "only visible ASCII characters are allowed".to_string(),
            ));
        }
        Ok(Self(key.to_string()))
    }

    pub(crate) fn derived(digest: String) -> Self {
        Self(format!("derived:{digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The tenant/user a cached response belongs to. Keys are only ever looked up
/// within one scope, so one caller cannot replay another's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerScope(String);

impl CallerScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What was asked for, kept alongside the cached response for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub method: String,
    pub path: String,
    pub params: String,
}

impl RequestFingerprint {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            params: params.into(),
        }
    }
}

/// A handler's response in storable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: None,
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string().into_bytes(),
            content_type: Some("application/json".to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A persisted response for one `(key, caller_scope)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub caller_scope: CallerScope,
    pub request: RequestFingerprint,
    pub response: CachedResponse,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a uniqueness-constrained insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A live record with the same identity already exists
    AlreadyExists,
}

// ============================================================================
// Sessions
// ============================================================================

/// The slice of the platform's session table the defense layer touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Opaque session id (stored hashed by the SQLite backend)
    pub id: String,
    /// Account identifier the session belongs to
    pub identifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Whole seconds from `now` until `until`, rounded up, never negative.
pub fn seconds_until(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
