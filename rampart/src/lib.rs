//! # Rampart
//!
//! Rampart is the request-defense layer for Rust web services. It bundles four
//! independent guards behind one facade:
//!
//! - Sliding-window rate limiting with escalating blocks, per client and action
//! - Durable account lockout after repeated failed logins
//! - Idempotency-key deduplication for retried mutations
//! - Per-session CSRF tokens for state-changing requests
//!
//! Lockout counters and idempotency records live in a durable store reached
//! through a [`RepositoryProvider`]. Rate-limit and CSRF state is held in
//! process memory, so a deployment with several instances needs sticky
//! routing for those two guards.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rampart::RampartBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rampart = RampartBuilder::new()
//!         .with_sqlite("sqlite://rampart.db")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     rampart.start().await;
//!
//!     let decision = rampart.check_rate_limit("203.0.113.7", "login").await;
//!     assert!(decision.allowed);
//!
//!     rampart.stop().await;
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use rampart_core::{
    IdempotencyService, LOGIN_ACTION, LockoutService, Maintenance,
    repositories::{
        IdempotencyRepositoryAdapter, LockoutRepositoryAdapter, SessionRepositoryAdapter,
    },
    services::{SessionCleanup, SweepReport},
};
use tokio::sync::Mutex;

mod builder;

pub use builder::{NoStorage, RampartBuilder, RampartBuilderError, WithStorage};

/// Re-export core types from rampart_core
///
/// These types are commonly used when working with the Rampart API.
pub use rampart_core::{
    CachedResponse, CallerScope, Clock, CredentialCheck, CsrfConfig, CsrfError, CsrfRequest,
    CsrfService, CsrfValidation, DefenseError, Event, EventBus, EventHandler, IdempotencyConfig,
    IdempotencyKey, IdempotentResponse, LockoutConfig, LockoutStatus, MaintenanceConfig,
    ManualClock, RateLimitConfig, RateLimitDecision, RateLimitPolicy, RateLimiter,
    RepositoryProvider, RequestFingerprint, SessionRecord, SystemClock, UnlockOutcome,
    UnlockReason,
};

/// Re-export storage backends
///
/// These storage implementations are available when the corresponding feature is enabled.
#[cfg(feature = "sqlite")]
pub use rampart_storage_sqlite::{SqliteRepositoryProvider, SqliteStorage};

/// The lockout service as wired by [`Rampart`].
pub type Lockout<R> =
    LockoutService<LockoutRepositoryAdapter<R>, SessionRepositoryAdapter<R>>;

/// The idempotency service as wired by [`Rampart`].
pub type Idempotency<R> = IdempotencyService<IdempotencyRepositoryAdapter<R>>;

/// Errors that can occur when using Rampart.
#[derive(Debug, thiserror::Error)]
pub enum RampartError {
    /// The caller supplied something malformed, such as an empty identifier
    #[error("Invalid input: {0}")]
    Validation(String),
    /// Error when interacting with storage
    #[error("Storage error: {0}")]
    Storage(String),
    /// A defense refused the request or could not reach its store
    #[error(transparent)]
    Defense(#[from] DefenseError),
}

impl From<rampart_core::Error> for RampartError {
    fn from(error: rampart_core::Error) -> Self {
        match error {
            rampart_core::Error::Validation(e) => RampartError::Validation(e.to_string()),
            rampart_core::Error::Defense(e) => RampartError::Defense(e),
            e if e.is_store_unavailable() => {
                RampartError::Defense(DefenseError::DurableStoreUnavailable(e.to_string()))
            }
            e => RampartError::Storage(e.to_string()),
        }
    }
}

/// Outcome of [`Rampart::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAttempt {
    /// The client is blocked from the login action; credentials were not checked
    RateLimited(RateLimitDecision),
    /// The lockout tracker handled the attempt
    Checked(CredentialCheck),
}

impl LoginAttempt {
    pub fn is_verified(&self) -> bool {
        matches!(self, LoginAttempt::Checked(check) if check.is_verified())
    }
}

/// The request-defense coordinator.
///
/// `Rampart` owns one instance of every guard, the event bus they publish to,
/// and the background maintenance task that expires their state.
///
/// # Example
///
/// ```rust,no_run
/// use rampart::{Rampart, SqliteRepositoryProvider};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
///     let rampart = Rampart::new(Arc::new(SqliteRepositoryProvider::new(pool)));
///     rampart.migrate().await?;
///
///     let outcome = rampart.unlock_account("alice@example.com", "admin@example.com").await?;
///     println!("revoked {} sessions", outcome.revoked_sessions.len());
///     Ok(())
/// }
/// ```
pub struct Rampart<R: RepositoryProvider> {
    repositories: Arc<R>,
    rate_limiter: Arc<RateLimiter>,
    lockout: Arc<Lockout<R>>,
    idempotency: Arc<Idempotency<R>>,
    csrf: Arc<CsrfService>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    maintenance_config: MaintenanceConfig,
    maintenance: Mutex<Option<rampart_core::MaintenanceHandle>>,
}

impl<R: RepositoryProvider> std::fmt::Debug for Rampart<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rampart")
            .field("rate_limiter", &self.rate_limiter)
            .field("csrf", &self.csrf)
            .field("clock", &self.clock)
            .field("maintenance_config", &self.maintenance_config)
            .finish_non_exhaustive()
    }
}

/// Everything [`Rampart::from_parts`] needs besides the repositories.
pub(crate) struct Settings {
    pub rate_limit: RateLimitConfig,
    pub lockout: LockoutConfig,
    pub idempotency: IdempotencyConfig,
    pub csrf: CsrfConfig,
    pub maintenance: MaintenanceConfig,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            lockout: LockoutConfig::default(),
            idempotency: IdempotencyConfig::default(),
            csrf: CsrfConfig::default(),
            maintenance: MaintenanceConfig::default(),
            clock: Arc::new(SystemClock),
            events: EventBus::new(),
        }
    }
}

impl<R: RepositoryProvider> Rampart<R> {
    /// Create a new Rampart instance with default configuration.
    ///
    /// Use [`RampartBuilder`] to change policies, the clock or event handlers.
    pub fn new(repositories: Arc<R>) -> Self {
        Self::from_parts(repositories, Settings::default())
    }

    pub(crate) fn from_parts(repositories: Arc<R>, settings: Settings) -> Self {
        let Settings {
            rate_limit,
            lockout,
            idempotency,
            csrf,
            maintenance,
            clock,
            events,
        } = settings;

        let lockout = LockoutService::new(
            Arc::new(LockoutRepositoryAdapter::new(repositories.clone())),
            Arc::new(SessionRepositoryAdapter::new(repositories.clone())),
            lockout,
            clock.clone(),
        )
        .with_event_bus(events.clone());

        let idempotency = IdempotencyService::new(
            Arc::new(IdempotencyRepositoryAdapter::new(repositories.clone())),
            idempotency,
            clock.clone(),
        )
        .with_event_bus(events.clone());

        Self {
            rate_limiter: Arc::new(RateLimiter::new(rate_limit, clock.clone())),
            lockout: Arc::new(lockout),
            idempotency: Arc::new(idempotency),
            csrf: Arc::new(CsrfService::new(csrf, clock.clone())),
            repositories,
            events,
            clock,
            maintenance_config: maintenance,
            maintenance: Mutex::new(None),
        }
    }

    /// Run migrations for the durable store.
    pub async fn migrate(&self) -> Result<(), RampartError> {
        self.repositories.migrate().await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), RampartError> {
        self.repositories.health_check().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn repositories(&self) -> &Arc<R> {
        &self.repositories
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn lockout(&self) -> &Arc<Lockout<R>> {
        &self.lockout
    }

    pub fn idempotency(&self) -> &Arc<Idempotency<R>> {
        &self.idempotency
    }

    pub fn csrf(&self) -> &Arc<CsrfService> {
        &self.csrf
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ------------------------------------------------------------------
    // Maintenance lifecycle
    // ------------------------------------------------------------------

    /// The sweeper over every piece of expiring state.
    pub fn maintenance(&self) -> Maintenance {
        let sessions = Arc::new(SessionRepositoryAdapter::new(self.repositories.clone()));
        Maintenance::new(self.maintenance_config.clone())
            .with_task(self.rate_limiter.clone())
            .with_task(self.csrf.clone())
            .with_task(self.lockout.clone())
            .with_task(self.idempotency.clone())
            .with_task(Arc::new(SessionCleanup::new(sessions, self.clock.clone())))
    }

    /// Start the background sweeper. Calling it again while it runs is a no-op.
    pub async fn start(&self) {
        let mut handle = self.maintenance.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        tracing::info!(
            interval_secs = self.maintenance_config.interval.as_secs(),
            "Starting maintenance task"
        );
        *handle = Some(self.maintenance().start());
    }

    /// Stop the background sweeper and wait for it to exit.
    pub async fn stop(&self) {
        let handle = self.maintenance.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.maintenance
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run one sweep pass in the foreground.
    pub async fn sweep_once(&self) -> Vec<SweepReport> {
        self.maintenance().run_once().await
    }

    // ------------------------------------------------------------------
    // Defenses
    // ------------------------------------------------------------------

    /// Check the rate limit and publish [`Event::RateLimited`] when this check
    /// starts a block.
    pub async fn check_rate_limit(&self, client_key: &str, action: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let already_blocked = self
            .rate_limiter
            .record_for(client_key, action)
            .and_then(|r| r.blocked_until)
            .is_some_and(|until| until > now);

        let decision = self.rate_limiter.check(client_key, action);
        if let Some(blocked_until) = decision.blocked_until.filter(|_| !already_blocked) {
            self.publish(Event::RateLimited {
                action: action.to_string(),
                client_key: client_key.to_string(),
                blocked_until,
                timestamp: now,
            })
            .await;
        }
        decision
    }

    /// Record the outcome of a rate-limited attempt.
    pub fn record_attempt(&self, client_key: &str, action: &str, success: bool) {
        self.rate_limiter.record(client_key, action, success);
    }

    /// Run a login attempt through the rate limiter and the lockout tracker.
    ///
    /// `credentials` is only polled when neither defense rejects the attempt.
    pub async fn authenticate<F>(
        &self,
        identifier: &str,
        client_key: &str,
        credentials: F,
    ) -> Result<LoginAttempt, RampartError>
    where
        F: Future<Output = Result<bool, rampart_core::Error>>,
    {
        let decision = self.check_rate_limit(client_key, LOGIN_ACTION).await;
        if !decision.allowed {
            return Ok(LoginAttempt::RateLimited(decision));
        }

        let check = self
            .lockout
            .verify_credentials(identifier, Some(client_key), credentials)
            .await?;
        self.rate_limiter
            .record(client_key, LOGIN_ACTION, check.is_verified());
        Ok(LoginAttempt::Checked(check))
    }

    /// Validate a request's CSRF token and publish [`Event::CsrfRejected`] on
    /// failure.
    pub async fn validate_csrf(
        &self,
        request: &CsrfRequest<'_>,
        session_id: Option<&str>,
    ) -> CsrfValidation {
        let validation = self.csrf.validate(request, session_id);
        if let Some(error) = validation.error {
            self.publish(Event::CsrfRejected {
                method: request.method.to_string(),
                path: request.path.to_string(),
                reason: error.to_string(),
                timestamp: self.clock.now(),
            })
            .await;
        }
        validation
    }

    /// Current lockout state of an account.
    pub async fn lockout_status(&self, identifier: &str) -> Result<LockoutStatus, RampartError> {
        Ok(self.lockout.status(identifier).await?)
    }

    /// Administrative unlock.
    ///
    /// Revokes the account's sessions, clears its failure state and drops the
    /// CSRF tokens bound to those sessions. The caller is responsible for
    /// having authorized `actor`.
    pub async fn unlock_account(
        &self,
        identifier: &str,
        actor: &str,
    ) -> Result<UnlockOutcome, RampartError> {
        let outcome = self.lockout.unlock(identifier, actor).await?;
        let dropped_tokens = outcome
            .revoked_sessions
            .iter()
            .filter(|hash| self.csrf.revoke_hashed(hash))
            .count();
        tracing::debug!(
            identifier = %outcome.identifier,
            dropped_tokens,
            "Dropped CSRF tokens of revoked sessions"
        );
        Ok(outcome)
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.events.emit(&event).await {
            tracing::warn!(event = event.name(), error = %e, "Event handler failed");
        }
    }
}
