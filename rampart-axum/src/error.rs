use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rampart::{CredentialCheck, DefenseError, LoginAttempt, RampartError};
use thiserror::Error;

use crate::types::ErrorBody;

/// A request refused at the HTTP edge.
///
/// Response bodies carry a generic message per status code. A client can tell
/// a rate limit (429) from a CSRF failure (403), but a locked account and a
/// wrong password both produce the same 401.
#[derive(Debug, Error)]
pub enum DefenseRejection {
    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimited { retry_after_seconds: u64 },

    #[error("CSRF validation failed")]
    Csrf,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl DefenseRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            DefenseRejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            DefenseRejection::Csrf | DefenseRejection::Forbidden => StatusCode::FORBIDDEN,
            DefenseRejection::InvalidCredentials => StatusCode::UNAUTHORIZED,
            DefenseRejection::BadRequest(_) => StatusCode::BAD_REQUEST,
            DefenseRejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DefenseRejection::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DefenseRejection::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a login outcome to the response it should produce, if any.
    ///
    /// `None` means the credentials were verified.
    pub fn from_login(attempt: &LoginAttempt, now: DateTime<Utc>) -> Option<Self> {
        match attempt {
            LoginAttempt::RateLimited(decision) => Some(DefenseRejection::RateLimited {
                retry_after_seconds: decision.retry_after_seconds(now).unwrap_or(1),
            }),
            LoginAttempt::Checked(CredentialCheck::Verified) => None,
            LoginAttempt::Checked(_) => Some(DefenseRejection::InvalidCredentials),
        }
    }
}

impl From<RampartError> for DefenseRejection {
    fn from(err: RampartError) -> Self {
        match err {
            RampartError::Validation(msg) => DefenseRejection::BadRequest(msg),
            RampartError::Storage(msg) => DefenseRejection::Internal(msg),
            RampartError::Defense(defense) => defense.into(),
        }
    }
}

impl From<DefenseError> for DefenseRejection {
    fn from(err: DefenseError) -> Self {
        match err {
            DefenseError::RateLimitExceeded {
                retry_after_seconds,
            } => DefenseRejection::RateLimited {
                retry_after_seconds,
            },
            DefenseError::AccountLocked => DefenseRejection::InvalidCredentials,
            DefenseError::CsrfInvalid => DefenseRejection::Csrf,
            DefenseError::IdempotencyStoreUnavailable(msg)
            | DefenseError::DurableStoreUnavailable(msg) => DefenseRejection::Unavailable(msg),
        }
    }
}

impl IntoResponse for DefenseRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            DefenseRejection::RateLimited { .. } => "Too many requests",
            DefenseRejection::Csrf | DefenseRejection::Forbidden => "Forbidden",
            DefenseRejection::InvalidCredentials => "Invalid credentials",
            DefenseRejection::BadRequest(msg) => msg.as_str(),
            DefenseRejection::PayloadTooLarge => "Payload too large",
            DefenseRejection::Unavailable(msg) => {
                tracing::error!(error = %msg, "Defense store unavailable");
                "Service unavailable"
            }
            DefenseRejection::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error at the defense layer");
                "Internal server error"
            }
        };

        let body = Json(ErrorBody {
            error: message.to_string(),
            code: status.as_u16(),
        });
        let mut response = (status, body).into_response();

        if let DefenseRejection::RateLimited {
            retry_after_seconds,
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
        }

        response
    }
}

pub type Result<T> = std::result::Result<T, DefenseRejection>;
