//! Repository trait for durable account lockout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{FailurePolicy, LockoutRecord},
};

/// Durable failed-authentication counters, one row per account identifier.
///
/// # Security Considerations
///
/// - Failures should be recorded for every identifier, existing or not, so
///   lockout behaviour does not reveal which accounts exist.
/// - `record_failure` must be a single atomic statement. Two concurrent
///   failures on different instances must both be counted.
/// - `purge_stale` must never delete a row whose lock is still active.
#[async_trait]
pub trait LockoutRepository: Send + Sync + 'static {
    /// Current record for an identifier, if any.
    async fn find(&self, identifier: &str) -> Result<Option<LockoutRecord>, Error>;

    /// Apply one failure and return the record as it stands afterwards.
    ///
    /// The count restarts at 1 when the previous lock has expired or the last
    /// failure is older than `policy.attempt_window`. When the new count
    /// reaches `policy.threshold` and no lock is active, `locked_until` is set
    /// to `now + policy.lockout_duration`. An active lock is never extended.
    async fn record_failure(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
        policy: FailurePolicy,
    ) -> Result<LockoutRecord, Error>;

    /// Clear the failure count, last failure and lock in one update.
    ///
    /// # Returns
    ///
    /// The record as it was before the reset, or `None` if there was none.
    async fn reset(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LockoutRecord>, Error>;

    /// Delete unlocked rows not updated since `before`.
    ///
    /// # Returns
    ///
    /// The number of rows deleted.
    async fn purge_stale(&self, now: DateTime<Utc>, before: DateTime<Utc>) -> Result<u64, Error>;
}
