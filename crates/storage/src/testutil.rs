//! Shared test utilities for message store testing.
//!
//! This module provides record builders, seeded stores and a fault-injecting
//! backend. It is feature-gated behind `testutil` to prevent leaking into
//! production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! msgsign-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use msgsign_storage::testutil::{FailingBackend, record_id, seeded_store};
//! ```

use std::{
    collections::HashSet,
    ops::RangeBounds,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    StorageBackend,
    backend::KeyRange,
    error::{StorageError, StorageResult},
    kv_store::{KvMessageStore, record_key},
    memory::MemoryBackend,
    transaction::Transaction,
    types::{KeyValue, Partition, Record},
};

/// Returns the record identifier whose shard key is `value`.
///
/// The identifier is the hex encoding of `value` in little-endian byte order,
/// so `record_id(v)` lands in shard `v % count`.
#[must_use]
pub fn record_id(value: u64) -> String {
    hex::encode(value.to_le_bytes())
}

/// Creates an unsigned record with identifier [`record_id(value)`](record_id).
#[must_use]
pub fn unsigned_record(value: u64) -> Record {
    Record::unsigned(record_id(value), format!("message-{value}"))
}

/// Adds the records `values` to the unsigned partition of `store`.
///
/// # Panics
///
/// Panics if the backend rejects a write.
pub async fn seed<B: StorageBackend>(store: &KvMessageStore<B>, values: impl IntoIterator<Item = u64>) {
    for value in values {
        store.put_unsigned(&unsigned_record(value)).await.expect("seed unsigned record");
    }
}

/// Creates an in-memory store holding unsigned records `0..count`.
pub async fn seeded_store(count: u64) -> KvMessageStore<MemoryBackend> {
    let store = KvMessageStore::new(MemoryBackend::new());
    seed(&store, 0..count).await;
    store
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`StorageResult`] is a [`StorageError::UnitAborted`].
#[macro_export]
macro_rules! assert_unit_aborted {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::StorageError::UnitAborted { .. })),
            "expected StorageError::UnitAborted, got: {:?}",
            result,
        );
    }};
}

#[derive(Default)]
struct FailureRules {
    sets: HashSet<Vec<u8>>,
    deletes: HashSet<Vec<u8>>,
}

/// A wrapper around [`MemoryBackend`] that injects failures.
///
/// Writes to registered keys fail with [`StorageError::Connection`], both on
/// the backend and inside its transactions. Commits can additionally be made to
/// fail with [`StorageError::Conflict`] a fixed number of times.
///
/// Clones share their rules and data.
#[derive(Clone, Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    rules: Arc<RwLock<FailureRules>>,
    conflicts_remaining: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl FailingBackend {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: MemoryBackend) -> Self {
        Self { inner, ..Self::default() }
    }

    /// Returns the wrapped backend, which bypasses every injected failure.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Makes every write to `key` fail.
    pub fn fail_set(&self, key: Vec<u8>) {
        self.rules.write().sets.insert(key);
    }

    /// Makes every delete of `key` fail.
    pub fn fail_delete(&self, key: Vec<u8>) {
        self.rules.write().deletes.insert(key);
    }

    /// Makes inserting record `id` into the signed partition fail.
    pub fn fail_signed_insert(&self, id: &str) {
        self.fail_set(record_key(Partition::Signed, id));
    }

    /// Makes removing record `id` from the unsigned partition fail.
    pub fn fail_unsigned_delete(&self, id: &str) {
        self.fail_delete(record_key(Partition::Unsigned, id));
    }

    /// Makes the next `count` transaction commits fail with a conflict.
    pub fn conflict_next_commits(&self, count: usize) {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
    }

    /// Removes every injected failure.
    pub fn clear(&self) {
        let mut rules = self.rules.write();
        rules.sets.clear();
        rules.deletes.clear();
        self.conflicts_remaining.store(0, Ordering::SeqCst);
    }

    /// Returns how many transaction commits were attempted.
    #[must_use]
    pub fn commit_attempts(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn check_set(&self, key: &[u8]) -> StorageResult<()> {
        if self.rules.read().sets.contains(key) {
            return Err(StorageError::connection(format!(
                "injected write failure for {}",
                String::from_utf8_lossy(key)
            )));
        }
        Ok(())
    }

    fn check_delete(&self, key: &[u8]) -> StorageResult<()> {
        if self.rules.read().deletes.contains(key) {
            return Err(StorageError::connection(format!(
                "injected delete failure for {}",
                String::from_utf8_lossy(key)
            )));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        self.conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.check_set(&key)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.check_delete(key)?;
        self.inner.delete(key).await
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        self.inner.get_range(range).await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let inner = self.inner.transaction().await?;
        Ok(Box::new(FailingTransaction { inner, backend: self.clone() }))
    }
}

/// Transaction wrapper applying the rules of its [`FailingBackend`].
struct FailingTransaction {
    inner: Box<dyn Transaction>,
    backend: FailingBackend,
}

#[async_trait]
impl Transaction for FailingTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn get_range(&self, range: KeyRange) -> StorageResult<Vec<KeyValue>> {
        self.inner.get_range(range).await
    }

    async fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.backend.check_set(&key)?;
        self.inner.set(key, value).await
    }

    async fn delete(&mut self, key: Vec<u8>) -> StorageResult<()> {
        self.backend.check_delete(&key)?;
        self.inner.delete(key).await
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let FailingTransaction { inner, backend } = *self;
        backend.commits.fetch_add(1, Ordering::SeqCst);
        if backend.take_conflict() {
            return Err(StorageError::conflict());
        }
        inner.commit().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{MessageStore, MessageUnit, RecordStore, ShardSpec};

    #[test]
    fn test_record_id_is_little_endian_hex() {
        assert_eq!(record_id(1), "0100000000000000");
        assert_eq!(record_id(0x0102), "0201000000000000");
    }

    #[tokio::test]
    async fn test_seeded_store() {
        let store = seeded_store(3).await;
        let records = store.list_records(Partition::Unsigned).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| !r.is_signed()));
    }

    #[tokio::test]
    async fn test_failing_backend_rejects_registered_writes() {
        let backend = FailingBackend::default();
        backend.fail_set(b"bad".to_vec());
        backend.fail_delete(b"sticky".to_vec());

        assert!(backend.set(b"good".to_vec(), b"v".to_vec()).await.is_ok());
        assert!(matches!(
            backend.set(b"bad".to_vec(), b"v".to_vec()).await,
            Err(StorageError::Connection { .. })
        ));
        assert!(backend.delete(b"sticky").await.is_err());

        let mut txn = backend.transaction().await.unwrap();
        assert!(txn.set(b"bad".to_vec(), b"v".to_vec()).await.is_err());

        backend.clear();
        assert!(backend.set(b"bad".to_vec(), b"v".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let backend = FailingBackend::default();
        backend.conflict_next_commits(1);

        let mut first = backend.transaction().await.unwrap();
        first.set(b"k".to_vec(), b"1".to_vec()).await.unwrap();
        assert_conflict!(first.commit().await);

        let mut second = backend.transaction().await.unwrap();
        second.set(b"k".to_vec(), b"2".to_vec()).await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(backend.commit_attempts(), 2);
        assert_eq!(backend.inner().get(b"k").await.unwrap(), Some(Bytes::from("2")));
    }

    fn assert_send_sync<T: Send + Sync + ?Sized>() {}

    #[test]
    fn test_transactions_are_shareable_across_tasks() {
        assert_send_sync::<FailingTransaction>();
        assert_send_sync::<dyn Transaction>();
    }

    #[tokio::test]
    async fn test_unit_over_failing_backend_runs_on_spawned_task() {
        let store = KvMessageStore::new(FailingBackend::default());
        seed(&store, 0..2).await;

        let unit = store.begin_unit().await.unwrap();
        let task = tokio::spawn(async move {
            let batch = unit.read_batch(ShardSpec::new(0, 1).unwrap()).await?;
            unit.close().await;
            Ok::<_, StorageError>(batch.len())
        });

        assert_eq!(task.await.unwrap().unwrap(), 2);
    }
}
