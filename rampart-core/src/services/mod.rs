//! Service layer for the defenses
//!
//! Each service owns one defense and the state it needs. Services that use
//! durable state are generic over the repository traits in
//! [`crate::repositories`].

pub mod csrf;
pub mod idempotency;
pub mod lockout;
pub mod maintenance;
pub mod rate_limit;

pub use csrf::{CsrfError, CsrfRequest, CsrfService, CsrfTokenRecord, CsrfValidation};
pub use idempotency::{IdempotencyService, IdempotentResponse};
pub use lockout::{CredentialCheck, LockoutService};
pub use maintenance::{Maintenance, MaintenanceHandle, SessionCleanup, Sweep, SweepReport};
pub use rate_limit::{RateLimitDecision, RateLimitRecord, RateLimiter};
