//! Per-session CSRF tokens.
//!
//! Tokens are bound to a session, expire after `token_ttl`, and are compared
//! in constant time. The store is keyed by the SHA-256 of the session id, the
//! same form the session table uses, so revoking an account's sessions can
//! revoke their tokens too.
//!
//! Tokens are held in process memory. A deployment with several instances
//! needs sticky sessions, or tokens issued by one instance are unknown to the
//! others.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;

use crate::{
    clock::Clock,
    config::CsrfConfig,
    crypto::{constant_time_compare, generate_secure_token, hash_token},
};

/// A live token for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfTokenRecord {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The parts of a request CSRF validation looks at.
#[derive(Debug, Clone, Copy)]
pub struct CsrfRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Token taken from the configured header
    pub token: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum CsrfError {
    #[error("no session")]
    MissingSession,
    #[error("missing CSRF token")]
    MissingToken,
    #[error("invalid or expired CSRF token")]
    InvalidToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CsrfValidation {
    pub valid: bool,
    pub error: Option<CsrfError>,
}

impl CsrfValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn rejected(error: CsrfError) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}

/// Methods that never change state and so never need a token.
pub fn is_safe_method(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS"
    )
}

#[derive(Debug)]
pub struct CsrfService {
    tokens: DashMap<String, CsrfTokenRecord>,
    config: CsrfConfig,
    clock: Arc<dyn Clock>,
}

impl CsrfService {
    pub fn new(config: CsrfConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Issue a fresh token for a session, replacing any previous one.
    pub fn issue(&self, session_id: &str) -> String {
        let token = generate_secure_token();
        let expires_at = self.clock.now() + self.config.token_ttl;
        self.tokens.insert(
            hash_token(session_id),
            CsrfTokenRecord {
                token: token.clone(),
                expires_at,
            },
        );
        token
    }

    /// Return the session's live token, issuing one if there is none.
    pub fn get_or_issue(&self, session_id: &str) -> String {
        let now = self.clock.now();
        match self.tokens.entry(hash_token(session_id)) {
            Entry::Occupied(entry) if entry.get().expires_at >= now => entry.get().token.clone(),
            entry => {
                let token = generate_secure_token();
                let record = CsrfTokenRecord {
                    token: token.clone(),
                    expires_at: now + self.config.token_ttl,
                };
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(record);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(record);
                    }
                }
                token
            }
        }
    }

    /// Check a token against the one issued for the session.
    ///
    /// An expired token is evicted and rejected.
    pub fn verify(&self, session_id: &str, token: &str) -> bool {
        let now = self.clock.now();
        match self.tokens.entry(hash_token(session_id)) {
            Entry::Vacant(_) => false,
            Entry::Occupied(entry) if now > entry.get().expires_at => {
                entry.remove();
                false
            }
            Entry::Occupied(entry) => {
                constant_time_compare(entry.get().token.as_bytes(), token.as_bytes())
            }
        }
    }

    /// Whether a request bypasses CSRF validation entirely.
    pub fn is_exempt(&self, method: &str, path: &str) -> bool {
        is_safe_method(method)
            || self
                .config
                .exempt_path_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Validate a request.
    pub fn validate(&self, request: &CsrfRequest<'_>, session_id: Option<&str>) -> CsrfValidation {
        if self.is_exempt(request.method, request.path) {
            return CsrfValidation::ok();
        }

        let validation = match (session_id, request.token) {
            (None, _) => CsrfValidation::rejected(CsrfError::MissingSession),
            (Some(_), None) => CsrfValidation::rejected(CsrfError::MissingToken),
            (Some(session_id), Some(token)) if self.verify(session_id, token) => {
                CsrfValidation::ok()
            }
            (Some(_), Some(_)) => CsrfValidation::rejected(CsrfError::InvalidToken),
        };

        if let Some(error) = validation.error {
            tracing::info!(
                target: "rampart::security",
                method = %request.method,
                path = %request.path,
                reason = %error,
                "CSRF validation failed"
            );
        }
        validation
    }

    /// Drop the token of a terminated session.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.revoke_hashed(&hash_token(session_id))
    }

    /// Drop a token by the session id hash stored in the session table.
    pub fn revoke_hashed(&self, session_hash: &str) -> bool {
        self.tokens.remove(session_hash).is_some()
    }

    /// Evict expired tokens, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.tokens.len();
        self.tokens.retain(|_, record| record.expires_at >= now);
        before.saturating_sub(self.tokens.len())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
