//! Storage error types and result alias.
//!
//! This module defines the error types that can occur during storage operations.
//! Every backend and the message store map their internal failures onto these
//! variants so the signing pipeline can decide what is retryable.
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - Key does not exist in the storage backend
//! - [`StorageError::Conflict`] - Unit conflict due to a concurrent committed write
//! - [`StorageError::UnitAborted`] - An earlier operation in the same unit failed
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Serialization`] - Document encoding/decoding failures
//! - [`StorageError::Internal`] - Backend-specific internal errors
//! - [`StorageError::Timeout`] - Operation exceeded time limit
//!
//! # Example
//!
//! ```
//! use msgsign_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(key))
//! }
//!
//! assert!(lookup("records/unsigned/00").is_err());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested key was not found in the storage backend.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// Write-write conflict detected when committing a unit.
    ///
    /// Another unit committed a write to one of the keys this unit wrote after
    /// this unit's snapshot was taken. The whole unit should be re-executed.
    #[error("Transaction conflict")]
    Conflict,

    /// The unit was aborted by an earlier failed operation.
    ///
    /// Document stores abort a multi-operation transaction as soon as one of
    /// its operations fails; the unit rejects every later operation and cannot
    /// commit.
    #[error("Unit aborted: {reason}")]
    UnitAborted {
        /// Description of the operation that aborted the unit.
        reason: String,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// This typically indicates a corrupt document or a schema mismatch
    /// between writer and reader.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `UnitAborted` error.
    #[must_use]
    pub fn unit_aborted(reason: impl Into<String>) -> Self {
        Self::UnitAborted { reason: reason.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` for write-write conflicts that a fresh re-execution may resolve.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Returns `true` for failures that are likely to succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict | Self::Connection { .. } | Self::Timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_transient() {
        assert!(StorageError::conflict().is_conflict());
        assert!(StorageError::conflict().is_transient());
    }

    #[test]
    fn test_aborted_unit_is_not_retried_in_place() {
        let err = StorageError::unit_aborted("insert failed");
        assert!(!err.is_conflict());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Unit aborted: insert failed");
    }

    #[test]
    fn test_serialization_keeps_source() {
        let source = serde_json::from_str::<u64>("nope").unwrap_err();
        let err = StorageError::serialization_with_source("bad document", source);
        assert!(std::error::Error::source(&err).is_some());
    }
}
