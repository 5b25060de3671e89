use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::EventError;

/// Reason why an account was unlocked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnlockReason {
    /// A successful authentication cleared the failure count
    SuccessfulLogin,
    /// Administrator manually unlocked the account
    AdminAction,
}

/// Security events emitted by the defense services.
///
/// Events are informational. A failing handler never changes the outcome of
/// the request that produced the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A client exceeded the rate limit for an action and is now blocked.
    RateLimited {
        action: String,
        client_key: String,
        blocked_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// An authentication attempt failed.
    LoginFailed {
        /// The normalised account identifier
        identifier: String,
        /// Number of failed attempts in the current window
        failed_attempts: u32,
        /// Client address, if known
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An account crossed the failure threshold and is now locked.
    ///
    /// This is a security-critical event that should trigger alerts.
    AccountLocked {
        identifier: String,
        failed_attempts: u32,
        locked_until: DateTime<Utc>,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An account's failure state was cleared.
    AccountUnlocked {
        identifier: String,
        reason: UnlockReason,
        /// Who performed the unlock, for admin actions
        actor: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A stored response was replayed for a repeated idempotency key.
    IdempotentReplay {
        key: String,
        caller_scope: String,
        timestamp: DateTime<Utc>,
    },

    /// A state-changing request failed CSRF validation.
    CsrfRejected {
        method: String,
        path: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RateLimited { .. } => "rate_limited",
            Event::LoginFailed { .. } => "login_failed",
            Event::AccountLocked { .. } => "account_locked",
            Event::AccountUnlocked { .. } => "account_unlocked",
            Event::IdempotentReplay { .. } => "idempotent_replay",
            Event::CsrfRejected { .. } => "csrf_rejected",
        }
    }
}

/// A trait for handling events emitted by the event bus
///
/// Implementors can be registered with the [`EventBus`] to receive every event.
///
/// # Examples
///
/// ```
/// # use rampart_core::events::{Event, EventHandler};
/// # use rampart_core::error::EventError;
/// # use async_trait::async_trait;
/// struct AuditLog;
///
/// #[async_trait]
/// impl EventHandler for AuditLog {
///     async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
///         println!("{}", event.name());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError>;
}

/// Fan-out of events to registered handlers.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers, stopping at the first error.
    pub async fn emit(&self, event: &Event) -> Result<(), EventError> {
        for handler in self.handlers.read().await.iter() {
            handler.handle_event(event).await?;
        }

        Ok(())
    }
}

/// Emit on an optional bus, logging handler failures instead of returning them.
pub(crate) async fn publish(bus: Option<&EventBus>, event: Event) {
    if let Some(bus) = bus {
        if let Err(e) = bus.emit(&event).await {
            tracing::warn!(event = event.name(), error = %e, "Event handler failed");
        }
    }
}
