//! Sliding-window rate limiting with escalating blocks.
//!
//! Each `(action, client_key)` pair gets its own counter. Once a client has
//! used up the attempts allowed by the action's [`RateLimitPolicy`], the next
//! check blocks it for the policy's `block_duration`. After the block has been
//! served the client starts over with a fresh window.
//!
//! State lives in a sharded [`DashMap`] owned by the limiter, so operations on
//! the same key are linearised while different keys do not contend. No
//! operation awaits.
//!
//! # Deployment
//!
//! Counters are per process. Behind a load balancer each instance enforces
//! its own limits; durable cross-instance protection for authentication comes
//! from [`LockoutService`](crate::services::LockoutService).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;

use crate::{
    clock::Clock,
    config::{LOGIN_ACTION, RateLimitConfig, RateLimitPolicy},
};

/// Counter state for one client and action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitRecord {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 1,
            window_start: now,
            blocked_until: None,
        }
    }

    fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// A record is stale once its block (if any) has been served, or when it
    /// has no block and its window has run out.
    fn is_stale(&self, now: DateTime<Utc>, policy: &RateLimitPolicy) -> bool {
        match self.blocked_until {
            Some(until) => until <= now,
            None => self.window_start + policy.window <= now,
        }
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_attempts: u32,
    /// When the current window (or block) ends
    pub reset_time: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitDecision {
    /// Whole seconds until the block lifts, rounded up.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.blocked_until
            .map(|until| crate::storage::seconds_until(until, now))
    }
}

type RecordKey = (String, String);

/// In-memory rate limiter keyed by action and client.
#[derive(Debug)]
pub struct RateLimiter {
    records: DashMap<RecordKey, RateLimitRecord>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a client may attempt an action now.
    ///
    /// Checking never counts an attempt. It does start a block when the
    /// client has no attempts left.
    pub fn check(&self, client_key: &str, action: &str) -> RateLimitDecision {
        let policy = *self.config.policy_for(action);
        let now = self.clock.now();
        let fresh = RateLimitDecision {
            allowed: true,
            remaining_attempts: policy.max_attempts,
            reset_time: now + policy.window,
            blocked_until: None,
        };

        let mut entry = match self.records.entry(key(action, client_key)) {
            Entry::Vacant(_) => return fresh,
            Entry::Occupied(entry) => entry,
        };

        if entry.get().is_stale(now, &policy) {
            entry.remove();
            return fresh;
        }

        let record = entry.get_mut();
        if let Some(until) = record.blocked_until {
            return RateLimitDecision {
                allowed: false,
                remaining_attempts: 0,
                reset_time: until,
                blocked_until: Some(until),
            };
        }

        let remaining = policy.max_attempts.saturating_sub(record.attempts);
        if remaining == 0 {
            let until = now + policy.block_duration;
            record.blocked_until = Some(until);
            tracing::warn!(
                target: "rampart::security",
                action = %action,
                client_key = %client_key,
                blocked_until = %until,
                "Rate limit exceeded, client blocked"
            );
            return RateLimitDecision {
                allowed: false,
                remaining_attempts: 0,
                reset_time: until,
                blocked_until: Some(until),
            };
        }

        RateLimitDecision {
            allowed: true,
            remaining_attempts: remaining,
            reset_time: record.window_start + policy.window,
            blocked_until: None,
        }
    }

    /// Record the outcome of an attempt.
    ///
    /// A successful login forgets the client's record. Every other outcome
    /// counts as one attempt; at the cap, the attempt starts a block instead.
    pub fn record(&self, client_key: &str, action: &str, success: bool) {
        let key = key(action, client_key);
        if success && action == LOGIN_ACTION {
            self.records.remove(&key);
            return;
        }

        let policy = *self.config.policy_for(action);
        let now = self.clock.now();

        match self.records.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(RateLimitRecord::fresh(now));
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.is_stale(now, &policy) {
                    *record = RateLimitRecord::fresh(now);
                } else if record.is_blocked_at(now) {
                    // Already serving a block.
                } else if record.attempts >= policy.max_attempts {
                    let until = now + policy.block_duration;
                    record.blocked_until = Some(until);
                    tracing::warn!(
                        target: "rampart::security",
                        action = %action,
                        client_key = %client_key,
                        blocked_until = %until,
                        "Attempt over rate limit, client blocked"
                    );
                } else {
                    record.attempts += 1;
                }
            }
        }
    }

    /// Forget a client's record for an action.
    pub fn reset(&self, client_key: &str, action: &str) {
        self.records.remove(&key(action, client_key));
    }

    /// Current record for a client, if any.
    pub fn record_for(&self, client_key: &str, action: &str) -> Option<RateLimitRecord> {
        self.records
            .get(&key(action, client_key))
            .map(|record| *record)
    }

    /// Evict records whose window and block have both elapsed.
    ///
    /// # Returns
    ///
    /// The number of records evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|(action, _), record| {
            !record.is_stale(now, self.config.policy_for(action))
        });
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn key(action: &str, client_key: &str) -> RecordKey {
    (action.to_string(), client_key.to_string())
}
