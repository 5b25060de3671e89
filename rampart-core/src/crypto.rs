//! Cryptographic utilities for token handling
//!
//! This module provides secure token generation, constant-time verification and
//! keyed digests used by the CSRF guard and the idempotency guard.
//!
//! # Security
//!
//! Token verification is vulnerable to timing attacks when using standard string
//! comparison because the comparison may exit early on the first mismatch. All
//! token comparisons in this crate go through [`constant_time_compare`], which
//! uses the `subtle` crate.
//!
//! Server-derived idempotency keys are HMAC-SHA256 digests keyed with a server
//! secret, so a client cannot precompute the key of somebody else's request.

use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Generate a cryptographically secure random token.
///
/// This produces a 256-bit (32-byte) random token encoded as URL-safe base64
/// (43 characters).
///
/// # Panics
///
/// Panics if the OS random number generator fails. This indicates a critical
/// system failure (e.g., /dev/urandom unavailable) from which recovery is not
/// possible for security-sensitive operations.
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Generate random secret key material, returning an error instead of panicking.
pub fn generate_secret(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Rng(e.to_string()))?;
    Ok(bytes)
}

/// Hash a token for storage using SHA256, hex encoded.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute an HMAC-SHA256 digest over a sequence of parts.
///
/// Every part is prefixed with its length as a big-endian `u64`, so
/// `["ab", "c"]` and `["a", "bc"]` never collide.
///
/// # Returns
///
/// The hex-encoded digest (64 characters).
pub fn keyed_digest(secret: &[u8], parts: &[&[u8]]) -> Result<String, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::InvalidKey("secret must not be empty".to_string()));
    }

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    for part in parts {
        mac.update(&(part.len() as u64).to_be_bytes());
        mac.update(part);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Perform constant-time comparison of two byte slices.
///
/// Slices of different length compare unequal; the length itself is not secret.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
