//! Core building blocks for the rampart request-defense layer
//!
//! This crate contains the four defenses and everything they share:
//!
//! - [`RateLimiter`]: per-client sliding windows with escalating blocks
//! - [`LockoutService`]: durable per-account lockout after repeated failures
//! - [`IdempotencyService`]: at-most-once execution of keyed requests
//! - [`CsrfService`]: per-session anti-forgery tokens
//!
//! Durable state is reached through the repository traits in [`repositories`];
//! `rampart-storage-sqlite` provides the SQLite implementation. All services
//! read time through a [`Clock`] so tests can control it.
//!
//! Application code normally uses the `rampart` facade crate rather than this
//! one directly.
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod repositories;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CsrfConfig, IdempotencyConfig, LOGIN_ACTION, LockoutConfig, MaintenanceConfig,
    RateLimitConfig, RateLimitPolicy,
};
pub use error::{DefenseError, Error};
pub use events::{Event, EventBus, EventHandler, UnlockReason};
pub use repositories::RepositoryProvider;
pub use services::{
    CredentialCheck, CsrfError, CsrfRequest, CsrfService, CsrfValidation, IdempotencyService,
    IdempotentResponse, LockoutService, Maintenance, MaintenanceHandle, RateLimitDecision,
    RateLimiter, Sweep,
};
pub use storage::{
    CachedResponse, CallerScope, IdempotencyKey, IdempotencyRecord, LockoutRecord, LockoutStatus,
    RequestFingerprint, SessionRecord, UnlockOutcome,
};
