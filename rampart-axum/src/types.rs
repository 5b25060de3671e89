use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the rate limiter and idempotency guard take the client key from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientKeySource {
    /// First address of `X-Forwarded-For`, then `X-Real-IP`, then the socket
    /// address. Both headers are client-controlled unless a trusted proxy
    /// overwrites them, so only use this behind such a proxy.
    #[default]
    ForwardedHeaders,
    /// Only the socket address from `ConnectInfo`.
    ConnectionOnly,
}

#[derive(Debug, Clone, Default)]
pub struct ClientKeyConfig {
    pub source: ClientKeySource,
}

impl ClientKeyConfig {
    pub fn connection_only() -> Self {
        Self {
            source: ClientKeySource::ConnectionOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    pub token: String,
    /// Header the token must be sent in
    pub header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub identifier: String,
    pub was_locked: bool,
    pub revoked_sessions: usize,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: u16,
}
