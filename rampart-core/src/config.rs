//! Configuration for the defense services.
//!
//! Every config has sensible defaults and a `from_env()` constructor that
//! overrides individual values from `RAMPART_*` environment variables.

use std::{collections::HashMap, str::FromStr};

use chrono::Duration;

use crate::{
    crypto,
    error::{Error, ValidationError},
};

/// Action name whose successful attempt wipes the client's rate-limit record.
pub const LOGIN_ACTION: &str = "login";

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ValidationError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ValidationError::InvalidConfig(format!("{name}={raw}"))),
        Err(_) => Ok(None),
    }
}

/// Static limits for one rate-limited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Attempts allowed per window before the client is blocked
    pub max_attempts: u32,
    /// Length of the counting window
    pub window: Duration,
    /// How long a block lasts once triggered
    pub block_duration: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_attempts: u32, window: Duration, block_duration: Duration) -> Self {
        Self {
            max_attempts,
            window,
            block_duration,
        }
    }

    /// Parse `max/window_secs/block_secs`, e.g. `5/900/1800`.
    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidConfig(format!("rate limit policy '{spec}'"));
        let mut parts = spec.trim().split('/');
        let max_attempts: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let window: i64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let block: i64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        if parts.next().is_some() || max_attempts == 0 || window <= 0 || block < 0 {
            return Err(invalid());
        }
        Ok(Self::new(
            max_attempts,
            Duration::seconds(window),
            Duration::seconds(block),
        ))
    }
}

/// Per-action rate limit policies.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub policies: HashMap<String, RateLimitPolicy>,
    /// Used for actions without an explicit policy
    pub default_policy: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            LOGIN_ACTION.to_string(),
            RateLimitPolicy::new(5, Duration::minutes(15), Duration::minutes(30)),
        );
        policies.insert(
            "register".to_string(),
            RateLimitPolicy::new(3, Duration::hours(1), Duration::hours(1)),
        );
        policies.insert(
            "password_reset".to_string(),
            RateLimitPolicy::new(3, Duration::hours(1), Duration::hours(1)),
        );
        Self {
            policies,
            default_policy: RateLimitPolicy::new(100, Duration::minutes(1), Duration::minutes(5)),
        }
    }
}

impl RateLimitConfig {
    pub fn with_policy(mut self, action: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.insert(action.into(), policy);
        self
    }

    pub fn with_default_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn policy_for(&self, action: &str) -> &RateLimitPolicy {
        self.policies.get(action).unwrap_or(&self.default_policy)
    }

    /// Reads `RAMPART_RATE_LIMIT_POLICIES`, a comma separated list of
    /// `action=max/window_secs/block_secs` entries, and
    /// `RAMPART_RATE_LIMIT_DEFAULT` in the same policy format.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("RAMPART_RATE_LIMIT_POLICIES") {
            for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
                let (action, policy) = entry.split_once('=').ok_or_else(|| {
                    ValidationError::InvalidConfig(format!("rate limit entry '{entry}'"))
                })?;
                config
                    .policies
                    .insert(action.trim().to_string(), RateLimitPolicy::parse(policy)?);
            }
        }

        if let Ok(raw) = std::env::var("RAMPART_RATE_LIMIT_DEFAULT") {
            config.default_policy = RateLimitPolicy::parse(&raw)?;
        }

        Ok(config)
    }
}

/// Configuration for durable account lockout.
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Whether lockout tracking is enabled
    pub enabled: bool,
    /// Failed attempts that trigger a lock
    pub max_failed_attempts: u32,
    /// How long a lock lasts
    pub lockout_duration: Duration,
    /// Failures further apart than this start a fresh count
    pub attempt_window: Duration,
    /// Unlocked rows untouched for this long are purged by the sweep
    pub retention_period: Duration,
    /// Upper bound for a single store call; exceeding it counts as locked
    pub store_timeout: std::time::Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            lockout_duration: Duration::minutes(15),
            attempt_window: Duration::minutes(15),
            retention_period: Duration::days(7),
            store_timeout: std::time::Duration::from_secs(2),
        }
    }
}

impl LockoutConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(enabled) = env_parse::<bool>("RAMPART_LOCKOUT_ENABLED")? {
            config.enabled = enabled;
        }
        if let Some(max) = env_parse::<u32>("RAMPART_LOCKOUT_MAX_ATTEMPTS")? {
            config.max_failed_attempts = max;
        }
        if let Some(secs) = env_parse::<i64>("RAMPART_LOCKOUT_DURATION_SECS")? {
            config.lockout_duration = Duration::seconds(secs);
        }
        if let Some(secs) = env_parse::<i64>("RAMPART_LOCKOUT_WINDOW_SECS")? {
            config.attempt_window = Duration::seconds(secs);
        }
        if let Some(ms) = env_parse::<u64>("RAMPART_LOCKOUT_STORE_TIMEOUT_MS")? {
            config.store_timeout = std::time::Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_failed_attempts == 0 {
            return Err(ValidationError::InvalidConfig(
                "max_failed_attempts must be at least 1".to_string(),
            ));
        }
        if self.lockout_duration <= Duration::zero() {
            return Err(ValidationError::InvalidConfig(
                "lockout_duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for idempotency-key deduplication.
#[derive(Clone)]
pub struct IdempotencyConfig {
    /// Server-held secret for derived keys. Must be shared by every instance
    /// behind the same store, otherwise derived keys will not match.
    pub secret: Vec<u8>,
    /// How long a stored response is replayed
    pub ttl: Duration,
    /// Upper bound for a single store call
    pub store_timeout: std::time::Duration,
    /// Rows deleted per statement by the sweep
    pub sweep_batch_size: u32,
}

impl std::fmt::Debug for IdempotencyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyConfig")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .field("store_timeout", &self.store_timeout)
            .field("sweep_batch_size", &self.sweep_batch_size)
            .finish()
    }
}

impl Default for IdempotencyConfig {
    /// Uses a random per-process secret. Multi-instance deployments must set
    /// one explicitly (see [`IdempotencyConfig::from_env`]).
    fn default() -> Self {
        Self {
            secret: crypto::generate_secret(32).unwrap_or_default(),
            ttl: Duration::hours(24),
            store_timeout: std::time::Duration::from_secs(2),
            sweep_batch_size: 500,
        }
    }
}

impl IdempotencyConfig {
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        match std::env::var("RAMPART_IDEMPOTENCY_SECRET") {
            Ok(secret) if !secret.is_empty() => config.secret = secret.into_bytes(),
            _ => tracing::warn!(
                "RAMPART_IDEMPOTENCY_SECRET not set, derived idempotency keys will not be shared across instances"
            ),
        }
        if let Some(secs) = env_parse::<i64>("RAMPART_IDEMPOTENCY_TTL_SECS")? {
            config.ttl = Duration::seconds(secs);
        }
        if let Some(ms) = env_parse::<u64>("RAMPART_IDEMPOTENCY_STORE_TIMEOUT_MS")? {
            config.store_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(batch) = env_parse::<u32>("RAMPART_IDEMPOTENCY_SWEEP_BATCH")? {
            config.sweep_batch_size = batch.max(1);
        }
        if config.secret.is_empty() {
            return Err(ValidationError::InvalidConfig(
                "idempotency secret must not be empty".to_string(),
            )
            .into());
        }
        Ok(config)
    }
}

/// Configuration for CSRF token issuance and validation.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Lifetime of an issued token
    pub token_ttl: Duration,
    /// Request header carrying the token
    pub header_name: String,
    /// Path prefixes that authenticate by other means (e.g. signed webhooks)
    pub exempt_path_prefixes: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::hours(1),
            header_name: "x-csrf-token".to_string(),
            exempt_path_prefixes: vec!["/api/webhooks/".to_string()],
        }
    }
}

impl CsrfConfig {
    pub fn with_exempt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_path_prefixes.push(prefix.into());
        self
    }

    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<i64>("RAMPART_CSRF_TTL_SECS")? {
            config.token_ttl = Duration::seconds(secs);
        }
        if let Ok(header) = std::env::var("RAMPART_CSRF_HEADER") {
            config.header_name = header.to_ascii_lowercase();
        }
        if let Ok(raw) = std::env::var("RAMPART_CSRF_EXEMPT_PREFIXES") {
            config.exempt_path_prefixes = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(config)
    }
}

/// Configuration for the background sweeper.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: std::time::Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
        }
    }
}

impl MaintenanceConfig {
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("RAMPART_SWEEP_INTERVAL_SECS")? {
            config.interval = std::time::Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }
}
