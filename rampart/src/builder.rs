//! Builder pattern for constructing Rampart instances
//!
//! This module provides a type-safe builder for creating [`Rampart`] instances
//! with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use rampart::{RampartBuilder, RateLimitPolicy};
//! use chrono::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rampart = RampartBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_rate_limit_policy(
//!             "password_reset",
//!             RateLimitPolicy::new(3, Duration::hours(1), Duration::hours(1)),
//!         )
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use rampart_core::{
    Clock, CsrfConfig, EventBus, EventHandler, IdempotencyConfig, LockoutConfig,
    MaintenanceConfig, RateLimitConfig, RateLimitPolicy, RepositoryProvider, SystemClock,
};

use crate::{Rampart, Settings};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Rampart instance.
#[derive(Debug, thiserror::Error)]
pub enum RampartBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`RampartBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Rampart`] instances.
///
/// Storage must be configured before [`build`](RampartBuilder::build) becomes
/// available.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build or add more configuration
pub struct RampartBuilder<Storage> {
    storage: Storage,
    rate_limit_config: RateLimitConfig,
    lockout_config: LockoutConfig,
    idempotency_config: IdempotencyConfig,
    csrf_config: CsrfConfig,
    maintenance_config: MaintenanceConfig,
    clock: Arc<dyn Clock>,
    event_handlers: Vec<Arc<dyn EventHandler>>,
    apply_migrations: bool,
}

impl Default for RampartBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl RampartBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Rate limits: `login` 5 per 15 min with a 30 min block, other actions 100 per minute
    /// - Lockout: enabled, 5 failures lock the account for 15 minutes
    /// - Idempotency: 24 hour replay window, random per-process secret
    /// - CSRF: 1 hour tokens, `/api/webhooks/` exempt
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            rate_limit_config: RateLimitConfig::default(),
            lockout_config: LockoutConfig::default(),
            idempotency_config: IdempotencyConfig::default(),
            csrf_config: CsrfConfig::default(),
            maintenance_config: MaintenanceConfig::default(),
            clock: Arc::new(SystemClock),
            event_handlers: Vec::new(),
            apply_migrations: false,
        }
    }

    /// Configure storage with any repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> RampartBuilder<WithStorage<R>> {
        self.with_storage(WithStorage { repositories })
    }

    fn with_storage<S>(self, storage: S) -> RampartBuilder<S> {
        RampartBuilder {
            storage,
            rate_limit_config: self.rate_limit_config,
            lockout_config: self.lockout_config,
            idempotency_config: self.idempotency_config,
            csrf_config: self.csrf_config,
            maintenance_config: self.maintenance_config,
            clock: self.clock,
            event_handlers: self.event_handlers,
            apply_migrations: self.apply_migrations,
        }
    }
}

// ============================================================================
// Storage Configuration Methods (NoStorage -> WithStorage)
// ============================================================================

#[cfg(feature = "sqlite")]
impl RampartBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// The database file is created if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<
        RampartBuilder<WithStorage<crate::SqliteRepositoryProvider>>,
        RampartBuilderError,
    > {
        let storage = crate::SqliteStorage::connect(url)
            .await
            .map_err(|e| RampartBuilderError::StorageConnection(e.to_string()))?;

        let repositories = Arc::new(storage.into_repository_provider());
        Ok(self.with_storage(WithStorage { repositories }))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// Use this when the application already has a pool and wants to share it.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> RampartBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        let repositories = Arc::new(crate::SqliteRepositoryProvider::new(pool));
        self.with_storage(WithStorage { repositories })
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<R: RepositoryProvider> RampartBuilder<WithStorage<R>> {
    /// Replace the whole rate-limit configuration.
    pub fn with_rate_limits(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    /// Set the policy for one action, keeping the others.
    pub fn with_rate_limit_policy(
        mut self,
        action: impl Into<String>,
        policy: RateLimitPolicy,
    ) -> Self {
        self.rate_limit_config = self.rate_limit_config.with_policy(action, policy);
        self
    }

    /// Configure account lockout.
    ///
    /// Default: enabled with 5 attempts and a 15 minute lockout
    pub fn with_lockout(mut self, config: LockoutConfig) -> Self {
        self.lockout_config = config;
        self
    }

    pub fn with_idempotency(mut self, config: IdempotencyConfig) -> Self {
        self.idempotency_config = config;
        self
    }

    pub fn with_csrf(mut self, config: CsrfConfig) -> Self {
        self.csrf_config = config;
        self
    }

    pub fn with_maintenance(mut self, config: MaintenanceConfig) -> Self {
        self.maintenance_config = config;
        self
    }

    /// Read every configuration section from `RAMPART_*` environment variables.
    pub fn with_config_from_env(mut self) -> Result<Self, RampartBuilderError> {
        let invalid = |e: rampart_core::Error| RampartBuilderError::InvalidConfiguration(e.to_string());
        self.rate_limit_config = RateLimitConfig::from_env().map_err(invalid)?;
        self.lockout_config = LockoutConfig::from_env().map_err(invalid)?;
        self.idempotency_config = IdempotencyConfig::from_env().map_err(invalid)?;
        self.csrf_config = CsrfConfig::from_env().map_err(invalid)?;
        self.maintenance_config = MaintenanceConfig::from_env().map_err(invalid)?;
        Ok(self)
    }

    /// Use a custom time source. Tests pass a `ManualClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a handler for security events.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the Rampart instance.
    ///
    /// If `apply_migrations(true)` was called, migrations are applied before
    /// returning. The maintenance task is not started; call
    /// [`Rampart::start`] for that.
    pub async fn build(self) -> Result<Rampart<R>, RampartBuilderError> {
        self.lockout_config
            .validate()
            .map_err(|e| RampartBuilderError::InvalidConfiguration(e.to_string()))?;
        if self.idempotency_config.secret.is_empty() {
            return Err(RampartBuilderError::InvalidConfiguration(
                "idempotency secret must not be empty".to_string(),
            ));
        }

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| RampartBuilderError::Migration(e.to_string()))?;
        }

        let events = EventBus::new();
        for handler in self.event_handlers {
            events.register(handler).await;
        }

        Ok(Rampart::from_parts(
            self.storage.repositories,
            Settings {
                rate_limit: self.rate_limit_config,
                lockout: self.lockout_config,
                idempotency: self.idempotency_config,
                csrf: self.csrf_config,
                maintenance: self.maintenance_config,
                clock: self.clock,
                events,
            },
        ))
    }
}
