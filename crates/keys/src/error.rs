//! Key store and signing error types.

use thiserror::Error;

/// Result type alias for key operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors raised by key stores and signing keys.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyError {
    /// No key with this identifier is known to the store.
    #[error("Signing key not found: {key_id}")]
    NotFound {
        /// Key ID that was not found.
        key_id: String,
    },

    /// Private key material could not be decoded.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The signing capability failed to produce a signature.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,
}

impl KeyError {
    /// Creates a `NotFound` error for `key_id`.
    #[must_use]
    pub fn not_found(key_id: impl Into<String>) -> Self {
        Self::NotFound { key_id: key_id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(KeyError::not_found("k1").to_string(), "Signing key not found: k1");
        assert_eq!(
            KeyError::InvalidKeyMaterial("expected 32 bytes".into()).to_string(),
            "Invalid key material: expected 32 bytes"
        );
        assert_eq!(KeyError::InvalidSignature.to_string(), "Invalid signature");
    }
}
