pub mod utilities;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Defense error: {0}")]
    Defense(#[from] DefenseError),
}

/// Outcomes of the defense layer that callers surface to clients.
///
/// Rejections such as an exceeded rate limit are normally returned as
/// structured values ([`RateLimitDecision`](crate::RateLimitDecision),
/// [`CredentialCheck`](crate::CredentialCheck), ...). These variants exist for
/// code paths that need to short-circuit with `?`, and for the two
/// infrastructure failures whose handling policy differs per component.
#[derive(Debug, Error)]
pub enum DefenseError {
    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Account locked")]
    AccountLocked,

    #[error("CSRF token invalid or missing")]
    CsrfInvalid,

    /// Recoverable: the idempotency guard fails open.
    #[error("Idempotency store unavailable: {0}")]
    IdempotencyStoreUnavailable(String),

    /// The lockout tracker fails closed on this error.
    #[error("Durable store unavailable: {0}")]
    DurableStoreUnavailable(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event bus error: {0}")]
    BusError(String),

    #[error("Event handler error: {0}")]
    HandlerError(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Random number generation failed: {0}")]
    Rng(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    /// Whether the error means the backing store could not be reached in time.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::Connection(_))
                | Error::Storage(StorageError::Timeout(_))
                | Error::Storage(StorageError::Database(_))
                | Error::Defense(DefenseError::DurableStoreUnavailable(_))
                | Error::Defense(DefenseError::IdempotencyStoreUnavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let storage_error = Error::Storage(StorageError::NotFound);
        assert_eq!(storage_error.to_string(), "Storage error: Record not found");

        let validation_error =
            Error::Validation(ValidationError::InvalidIdempotencyKey("".to_string()));
        assert_eq!(
            validation_error.to_string(),
            "Validation error: Invalid idempotency key: "
        );

        let defense_error = Error::Defense(DefenseError::RateLimitExceeded {
            retry_after_seconds: 30,
        });
        assert_eq!(
            defense_error.to_string(),
            "Defense error: Rate limit exceeded, retry after 30 seconds"
        );
    }

    #[test]
    fn test_timeout_display() {
        let timeout = StorageError::Timeout(250);
        assert_eq!(timeout.to_string(), "Operation timed out after 250 ms");
    }

    #[test]
    fn test_is_store_unavailable() {
        assert!(Error::Storage(StorageError::Timeout(100)).is_store_unavailable());
        assert!(Error::Storage(StorageError::Connection("refused".into())).is_store_unavailable());
        assert!(
            Error::Defense(DefenseError::DurableStoreUnavailable("down".into()))
                .is_store_unavailable()
        );
        assert!(!Error::Storage(StorageError::NotFound).is_store_unavailable());
        assert!(!Error::Defense(DefenseError::AccountLocked).is_store_unavailable());
    }

    #[test]
    fn test_error_kind_predicates() {
        assert!(Error::Storage(StorageError::NotFound).is_storage_error());
        assert!(Error::Validation(ValidationError::MissingField("x".into())).is_validation_error());
        assert!(Error::Crypto(CryptoError::Rng("no entropy".into())).is_crypto_error());
        assert!(!Error::Defense(DefenseError::CsrfInvalid).is_storage_error());
    }

    #[test]
    fn test_error_from_conversions() {
        let error: Error = DefenseError::AccountLocked.into();
        assert!(matches!(error, Error::Defense(DefenseError::AccountLocked)));

        let error: Error = StorageError::Constraint("unique".into()).into();
        assert!(matches!(error, Error::Storage(StorageError::Constraint(_))));
    }
}
