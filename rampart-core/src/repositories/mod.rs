//! Repository traits for the durable data the defenses rely on
//!
//! Services never talk to a database directly; they depend on these traits.
//!
//! # Trait Hierarchy
//!
//! - Individual `*Repository` traits define the operations for each data domain
//! - Individual `*RepositoryProvider` traits provide access to each repository type
//! - [`RepositoryProvider`] is a supertrait combining all provider traits plus lifecycle methods
//!
//! Rate limiting and CSRF tokens are process-local and have no repository.

pub mod adapter;
pub mod idempotency;
pub mod lockout;
pub mod session;

pub use adapter::{
    IdempotencyRepositoryAdapter, LockoutRepositoryAdapter, SessionRepositoryAdapter,
};
pub use idempotency::IdempotencyRepository;
pub use lockout::LockoutRepository;
pub use session::SessionRepository;

use async_trait::async_trait;

use crate::Error;

// ============================================================================
// Individual Repository Provider Traits
// ============================================================================

/// Provider trait for lockout repository access.
pub trait LockoutRepositoryProvider: Send + Sync + 'static {
    /// The lockout repository implementation type
    type LockoutRepo: LockoutRepository;

    /// Get the lockout repository
    fn lockout(&self) -> &Self::LockoutRepo;
}

/// Provider trait for idempotency repository access.
pub trait IdempotencyRepositoryProvider: Send + Sync + 'static {
    /// The idempotency repository implementation type
    type IdempotencyRepo: IdempotencyRepository;

    /// Get the idempotency repository
    fn idempotency(&self) -> &Self::IdempotencyRepo;
}

/// Provider trait for session repository access.
pub trait SessionRepositoryProvider: Send + Sync + 'static {
    /// The session repository implementation type
    type SessionRepo: SessionRepository;

    /// Get the session repository
    fn session(&self) -> &Self::SessionRepo;
}

// ============================================================================
// Unified Repository Provider Trait
// ============================================================================

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Implementing a Custom Storage Backend
///
/// 1. Implement each individual `*Repository` trait for your backend
/// 2. Implement each individual `*RepositoryProvider` trait
/// 3. Implement the `RepositoryProvider` trait with `migrate()` and `health_check()`
///
/// # Example
///
/// ```rust,ignore
/// use rampart_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl LockoutRepositoryProvider for MyStorage {
///     type LockoutRepo = MyLockoutRepository;
///     fn lockout(&self) -> &Self::LockoutRepo { &self.lockout_repo }
/// }
///
/// // ... implement other provider traits ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider:
    LockoutRepositoryProvider + IdempotencyRepositoryProvider + SessionRepositoryProvider
{
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
