//! Storage backend trait definition.
//!
//! This module defines the [`StorageBackend`] trait, the byte-oriented
//! key-value abstraction the message store is built on. The message store
//! maps record partitions and key metadata onto key prefixes; backends know
//! nothing about records.
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Implement a corresponding [`Transaction`] type with snapshot reads and
//!    first-committer-wins conflict detection
//! 3. Map backend-specific errors to [`StorageError`](crate::StorageError)
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::ops::{Bound, RangeBounds};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StorageResult, transaction::Transaction, types::KeyValue};

/// An owned key range, usable across the object-safe [`Transaction`] boundary.
pub type KeyRange = (Bound<Vec<u8>>, Bound<Vec<u8>>);

/// Returns the range covering every key that starts with `prefix`.
///
/// # Examples
///
/// ```
/// use std::ops::Bound;
/// use msgsign_storage::backend::prefix_range;
///
/// let (start, end) = prefix_range(b"records/");
/// assert_eq!(start, Bound::Included(b"records/".to_vec()));
/// assert_eq!(end, Bound::Excluded(b"records0".to_vec()));
/// ```
#[must_use]
pub fn prefix_range(prefix: &[u8]) -> KeyRange {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return (Bound::Included(prefix.to_vec()), Bound::Excluded(end));
        }
    }
    (Bound::Included(prefix.to_vec()), Bound::Unbounded)
}

/// Abstract storage backend for key-value operations.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and support
/// concurrent operations. Writes issued directly on the backend commit
/// immediately and participate in conflict detection of open transactions.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use msgsign_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves the value stored at `key`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores `value` at `key`, replacing any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Removes `key`. Deleting a missing key is not an error.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Returns every key-value pair in `range`, ordered by key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Begins a snapshot transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_increments_last_byte() {
        let (start, end) = prefix_range(b"signing-keys/");
        assert_eq!(start, Bound::Included(b"signing-keys/".to_vec()));
        assert_eq!(end, Bound::Excluded(b"signing-keys0".to_vec()));
    }

    #[test]
    fn test_prefix_range_carries_over_max_bytes() {
        let (_, end) = prefix_range(&[0x01, 0xFF, 0xFF]);
        assert_eq!(end, Bound::Excluded(vec![0x02]));

        let (_, end) = prefix_range(&[0xFF]);
        assert_eq!(end, Bound::Unbounded);
    }
}
