//! Transaction trait for atomic storage operations.
//!
//! This module defines the [`Transaction`] trait that enables atomic
//! multi-operation commits to storage backends.
//!
//! # Transaction Semantics
//!
//! Transactions provide:
//! - **Snapshot reads**: All reads observe the backend as of the moment the transaction began
//! - **Read-your-writes**: Reads within a transaction see its own pending writes
//! - **Atomicity**: All buffered writes are applied together on commit, or none are
//! - **First committer wins**: Commit fails with [`StorageError::Conflict`] if another writer
//!   committed to any key this transaction wrote after the snapshot was taken
//!
//! Dropping a transaction without committing discards every buffered write.
//!
//! # Example
//!
//! ```
//! use msgsign_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"records/unsigned/01".to_vec(), b"{}".to_vec()).await.unwrap();
//!
//! // Move a record between partitions atomically
//! let mut txn = backend.transaction().await.unwrap();
//! txn.set(b"records/signed/01".to_vec(), b"{}".to_vec()).await.unwrap();
//! txn.delete(b"records/unsigned/01".to_vec()).await.unwrap();
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"records/unsigned/01").await.unwrap().is_none());
//! assert!(backend.get(b"records/signed/01").await.unwrap().is_some());
//! # });
//! ```
//!
//! [`StorageError::Conflict`]: crate::StorageError::Conflict

use async_trait::async_trait;
use bytes::Bytes;

use crate::{backend::KeyRange, error::StorageResult, types::KeyValue};

/// Transaction handle for atomic multi-operation commits.
///
/// Writes are issued through async, fallible calls so that backends that
/// talk to a remote store inside the transaction can surface per-operation
/// failures; the in-memory backend only buffers them.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Gets a value as seen by this transaction.
    ///
    /// Pending writes of this transaction take precedence over the snapshot.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Returns every key-value pair in `range` as seen by this transaction,
    /// ordered by key.
    async fn get_range(&self, range: KeyRange) -> StorageResult<Vec<KeyValue>>;

    /// Buffers a set operation within the transaction.
    async fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Buffers a delete operation within the transaction.
    async fn delete(&mut self, key: Vec<u8>) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if another writer committed to
    ///   a key this transaction wrote after its snapshot was taken
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
