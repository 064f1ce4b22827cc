//! Signer error types.

use msgsign_keys::KeyError;
use msgsign_storage::StorageError;
use thiserror::Error;

/// Result type alias for signer operations.
pub type SignerResult<T> = Result<T, SignerError>;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Rejected value.
        value: String,
    },

    /// A field holds a value that is not usable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Errors raised while starting the signer or running a signing round.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignerError {
    /// The worker identity string is not of the form `<name>-<index>`.
    #[error("invalid worker identity {identity:?}: {reason}")]
    InvalidIdentity {
        /// The rejected identity string.
        identity: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A shard index is not below the shard count.
    #[error("shard index {index} is out of range for {count} shards")]
    ShardOutOfRange {
        /// Requested shard index.
        index: u64,
        /// Number of shards.
        count: u64,
    },

    /// Fewer signing keys than replicas.
    #[error("{available} signing keys available, at least {required} required")]
    InsufficientKeys {
        /// Keys known to the key store.
        available: usize,
        /// Keys needed, one per replica.
        required: u64,
    },

    /// The requested key is not one of the keys known at startup.
    #[error("unknown signing key: {key_id}")]
    UnknownKey {
        /// The unknown key identifier.
        key_id: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every attempt of a unit ended in a write conflict.
    #[error("unit retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// A spawned round terminated without producing an outcome.
    #[error("signing round failed: {reason}")]
    RoundFailed {
        /// Why the round task ended.
        reason: String,
    },

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Key lookup or signing failed.
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

impl SignerError {
    /// Creates an `InvalidIdentity` error.
    #[must_use]
    pub fn invalid_identity(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity { identity: identity.into(), reason: reason.into() }
    }

    /// Returns `true` for errors that are fatal at startup rather than
    /// failures of a single round.
    #[must_use]
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentity { .. }
                | Self::ShardOutOfRange { .. }
                | Self::InsufficientKeys { .. }
                | Self::Config(_)
        )
    }
}
