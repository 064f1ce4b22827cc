//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] suitable for testing, development and single-process
//! deployments of the signer.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Keys are stored in a [`BTreeMap`] for prefix scans
//! - **Snapshot transactions**: Each transaction reads from a copy of the data taken when it
//!   began, buffers its writes, and validates them on commit (first committer wins)
//!
//! # Conflict Detection
//!
//! Every committed write (direct or transactional, including deletes) stamps
//! the key with a monotonically increasing commit sequence. A transaction
//! records the sequence current at its start; on commit, any written key whose
//! stamp is newer than that start sequence means a concurrent writer won and the
//! commit fails with [`StorageError::Conflict`]. Read-only transactions always
//! commit.
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Beginning a transaction copies the whole map, O(n) in the number of keys

use std::{
    collections::{BTreeMap, HashMap},
    ops::{Bound, RangeBounds},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::{KeyRange, StorageBackend},
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

#[derive(Debug, Default)]
struct MemoryState {
    data: BTreeMap<Vec<u8>, Bytes>,
    /// Commit sequence of the last write to each key, deletes included.
    versions: HashMap<Vec<u8>, u64>,
    commit_seq: u64,
}

impl MemoryState {
    fn apply(&mut self, key: Vec<u8>, value: Option<Bytes>, seq: u64) {
        match value {
            Some(v) => {
                self.data.insert(key.clone(), v);
            },
            None => {
                self.data.remove(&key);
            },
        }
        self.versions.insert(key, seq);
    }

    fn next_seq(&mut self) -> u64 {
        self.commit_seq += 1;
        self.commit_seq
    }
}

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory storage backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().data.is_empty()
    }
}

fn borrow_bounds<R: RangeBounds<Vec<u8>>>(range: &R) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let start = match range.start_bound() {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    };
    let end = match range.end_bound() {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    };
    (start, end)
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all)]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.state.read().data.get(key).cloned())
    }

    #[tracing::instrument(skip_all)]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut state = self.state.write();
        let seq = state.next_seq();
        state.apply(key, Some(Bytes::from(value)), seq);
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut state = self.state.write();
        let seq = state.next_seq();
        state.apply(key.to_vec(), None, seq);
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let state = self.state.read();
        let results = state
            .data
            .range::<[u8], _>(borrow_bounds(&range))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect();
        Ok(results)
    }

    #[tracing::instrument(skip_all)]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let (snapshot, start_seq) = {
            let state = self.state.read();
            (state.data.clone(), state.commit_seq)
        };
        Ok(Box::new(MemoryTransaction {
            backend: self.clone(),
            snapshot,
            start_seq,
            pending_writes: BTreeMap::new(),
        }))
    }
}

/// In-memory snapshot transaction.
///
/// Reads come from the snapshot overlaid with pending writes; writes are
/// buffered until commit.
struct MemoryTransaction {
    backend: MemoryBackend,
    snapshot: BTreeMap<Vec<u8>, Bytes>,
    start_seq: u64,
    pending_writes: BTreeMap<Vec<u8>, Option<Bytes>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    async fn get_range(&self, range: KeyRange) -> StorageResult<Vec<KeyValue>> {
        let bounds = borrow_bounds(&range);
        let mut merged: BTreeMap<&[u8], Bytes> = self
            .snapshot
            .range::<[u8], _>(bounds)
            .map(|(k, v)| (k.as_slice(), v.clone()))
            .collect();

        for (key, value) in self.pending_writes.range::<[u8], _>(bounds) {
            match value {
                Some(v) => {
                    merged.insert(key.as_slice(), v.clone());
                },
                None => {
                    merged.remove(key.as_slice());
                },
            }
        }

        Ok(merged
            .into_iter()
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v))
            .collect())
    }

    async fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.pending_writes.insert(key, Some(Bytes::from(value)));
        Ok(())
    }

    async fn delete(&mut self, key: Vec<u8>) -> StorageResult<()> {
        self.pending_writes.insert(key, None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemoryTransaction { backend, start_seq, pending_writes, .. } = *self;
        if pending_writes.is_empty() {
            return Ok(());
        }

        let mut state = backend.state.write();

        // Validate every write before applying any of them
        for key in pending_writes.keys() {
            if state.versions.get(key).is_some_and(|seq| *seq > start_seq) {
                tracing::debug!(
                    key = %String::from_utf8_lossy(key),
                    start_seq,
                    "write-write conflict on commit"
                );
                return Err(StorageError::Conflict);
            }
        }

        let seq = state.next_seq();
        for (key, value) in pending_writes {
            state.apply(key, value, seq);
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::prefix_range;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend.set(b"key1".to_vec(), b"value1".to_vec()).await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value1")));

        backend.delete(b"key1").await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_range_operations() {
        let backend = MemoryBackend::new();

        backend.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        backend.set(b"b".to_vec(), b"2".to_vec()).await.unwrap();
        backend.set(b"c".to_vec(), b"3".to_vec()).await.unwrap();

        let range = backend.get_range(b"a".to_vec()..b"c".to_vec()).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].key, Bytes::from("a"));
        assert_eq!(range[1].key, Bytes::from("b"));
    }

    #[tokio::test]
    async fn test_transaction_read_your_writes() {
        let backend = MemoryBackend::new();
        backend.set(b"p/1".to_vec(), b"one".to_vec()).await.unwrap();
        backend.set(b"p/2".to_vec(), b"two".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.set(b"p/3".to_vec(), b"three".to_vec()).await.unwrap();
        txn.delete(b"p/1".to_vec()).await.unwrap();

        assert_eq!(txn.get(b"p/3").await.unwrap(), Some(Bytes::from("three")));
        assert_eq!(txn.get(b"p/1").await.unwrap(), None);

        let keys: Vec<Bytes> =
            txn.get_range(prefix_range(b"p/")).await.unwrap().into_iter().map(|kv| kv.key).collect();
        assert_eq!(keys, vec![Bytes::from("p/2"), Bytes::from("p/3")]);

        // Nothing is visible outside until commit
        assert_eq!(backend.get(b"p/3").await.unwrap(), None);
        txn.commit().await.unwrap();
        assert_eq!(backend.get(b"p/3").await.unwrap(), Some(Bytes::from("three")));
        assert_eq!(backend.get(b"p/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_reads_snapshot() {
        let backend = MemoryBackend::new();
        backend.set(b"key".to_vec(), b"before".to_vec()).await.unwrap();

        let txn = backend.transaction().await.unwrap();
        backend.set(b"key".to_vec(), b"after".to_vec()).await.unwrap();
        backend.set(b"new".to_vec(), b"x".to_vec()).await.unwrap();

        assert_eq!(txn.get(b"key").await.unwrap(), Some(Bytes::from("before")));
        assert_eq!(txn.get(b"new").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_write_conflict_first_committer_wins() {
        let backend = MemoryBackend::new();
        backend.set(b"nonce".to_vec(), b"0".to_vec()).await.unwrap();

        let mut first = backend.transaction().await.unwrap();
        let mut second = backend.transaction().await.unwrap();
        first.set(b"nonce".to_vec(), b"3".to_vec()).await.unwrap();
        second.set(b"nonce".to_vec(), b"5".to_vec()).await.unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(StorageError::Conflict)));
        assert_eq!(backend.get(b"nonce").await.unwrap(), Some(Bytes::from("3")));
    }

    #[tokio::test]
    async fn test_direct_delete_conflicts_with_open_transaction() {
        let backend = MemoryBackend::new();
        backend.set(b"rec".to_vec(), b"v".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.delete(b"rec".to_vec()).await.unwrap();
        backend.delete(b"rec").await.unwrap();

        assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_disjoint_transactions_both_commit() {
        let backend = MemoryBackend::new();

        let mut first = backend.transaction().await.unwrap();
        let mut second = backend.transaction().await.unwrap();
        first.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        second.set(b"b".to_vec(), b"2".to_vec()).await.unwrap();

        first.commit().await.unwrap();
        second.commit().await.unwrap();
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let backend = MemoryBackend::new();
        {
            let mut txn = backend.transaction().await.unwrap();
            txn.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
        }
        assert_eq!(backend.get(b"key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let backend1 = MemoryBackend::new();
        let backend2 = backend1.clone();

        backend1.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();

        let value = backend2.get(b"key").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value")));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_sorted_keys() -> impl Strategy<Value = Vec<Vec<u8>>> {
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..16), 0..30)
                .prop_map(|mut keys| {
                    keys.sort();
                    keys.dedup();
                    keys
                })
        }

        proptest! {
            /// A transaction's range view equals the committed range view when
            /// it has no pending writes.
            #[test]
            fn transaction_range_matches_backend_range(
                keys in arb_sorted_keys(),
                prefix in proptest::collection::vec(any::<u8>(), 0..2),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("runtime");

                rt.block_on(async {
                    let backend = MemoryBackend::new();
                    for key in &keys {
                        backend.set(key.clone(), b"v".to_vec()).await.unwrap();
                    }

                    let direct = backend.get_range(prefix_range(&prefix)).await.unwrap();
                    let txn = backend.transaction().await.unwrap();
                    let snapshot = txn.get_range(prefix_range(&prefix)).await.unwrap();
                    prop_assert_eq!(&direct, &snapshot);

                    for kv in &direct {
                        prop_assert!(kv.key.starts_with(&prefix));
                    }
                    for pair in direct.windows(2) {
                        prop_assert!(pair[0].key < pair[1].key);
                    }

                    Ok(())
                })?;
            }
        }
    }
}
