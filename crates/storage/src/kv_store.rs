//! Message store built on a [`StorageBackend`].
//!
//! Records and key metadata are JSON documents stored under three key
//! prefixes:
//!
//! | Prefix | Contents |
//! |--------|----------|
//! | `records/unsigned/{id}` | records waiting to be signed |
//! | `records/signed/{id}` | signed records |
//! | `signing-keys/{id}` | per-key nonce metadata |
//!
//! Documents are keyed by record id. A signed document is written once: moving
//! a record whose signed copy already exists keeps that copy and only removes
//! the unsigned one, and shard reads finish such interrupted moves instead of
//! returning the record for re-signing. Unsigned documents that fail to decode
//! are logged and skipped by shard reads.
//!
//! [`KvMessageUnit`] runs the same operations inside a backend transaction.
//! Like a document-store transaction, the unit is aborted by the first failed
//! operation: every later operation fails with
//! [`StorageError::UnitAborted`] and the unit can no longer commit.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::{
    backend::{StorageBackend, prefix_range},
    error::{StorageError, StorageResult},
    message_store::{MessageStore, MessageUnit, RecordStore},
    shard::{ShardSpec, select_shard},
    transaction::Transaction,
    types::{KeyValue, Partition, Record, SigningKeyMetadata},
};

/// Key prefix of the unsigned record partition.
pub const UNSIGNED_PREFIX: &str = "records/unsigned/";

/// Key prefix of the signed record partition.
pub const SIGNED_PREFIX: &str = "records/signed/";

/// Key prefix of signing key metadata documents.
pub const KEY_METADATA_PREFIX: &str = "signing-keys/";

fn partition_prefix(partition: Partition) -> &'static str {
    match partition {
        Partition::Unsigned => UNSIGNED_PREFIX,
        Partition::Signed => SIGNED_PREFIX,
    }
}

/// Returns the backend key of record `id` in `partition`.
#[must_use]
pub fn record_key(partition: Partition, id: &str) -> Vec<u8> {
    format!("{}{id}", partition_prefix(partition)).into_bytes()
}

/// Returns the backend key of the metadata document of `key_id`.
#[must_use]
pub fn metadata_key(key_id: &str) -> Vec<u8> {
    format!("{KEY_METADATA_PREFIX}{key_id}").into_bytes()
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::serialization_with_source("failed to encode document", e))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::serialization_with_source("failed to decode document", e))
}

/// Raw key-value access shared by the direct store and open units.
#[async_trait]
trait KvAccess: Send + Sync {
    async fn kv_get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;
    async fn kv_scan(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>>;
    async fn kv_set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;
    async fn kv_delete(&self, key: Vec<u8>) -> StorageResult<()>;
}

async fn scan_partition<K: KvAccess + ?Sized>(
    kv: &K,
    partition: Partition,
) -> StorageResult<Vec<Record>> {
    kv.kv_scan(partition_prefix(partition).as_bytes())
        .await?
        .iter()
        .map(|entry| decode(&entry.value))
        .collect()
}

async fn count_records<K: KvAccess + ?Sized>(kv: &K, partition: Partition) -> StorageResult<usize> {
    Ok(kv.kv_scan(partition_prefix(partition).as_bytes()).await?.len())
}

async fn read_shard<K: KvAccess + ?Sized>(kv: &K, shard: ShardSpec) -> StorageResult<Vec<Record>> {
    let entries = kv.kv_scan(UNSIGNED_PREFIX.as_bytes()).await?;
    let scanned = entries.len();
    let candidates = entries.iter().filter_map(|entry| match decode::<Record>(&entry.value) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(
                key = %String::from_utf8_lossy(&entry.key),
                error = %err,
                "skipping undecodable unsigned record"
            );
            None
        },
    });

    let mut selected = Vec::new();
    for record in select_shard(candidates, shard) {
        if kv.kv_get(&record_key(Partition::Signed, &record.id)).await?.is_some() {
            finish_move(kv, &record.id).await;
        } else {
            selected.push(record);
        }
    }
    debug!(%shard, scanned, selected = selected.len(), "read shard of unsigned records");
    Ok(selected)
}

/// Drops the unsigned copy of a record that is already signed.
///
/// Failures are logged and left for a later read to retry.
async fn finish_move<K: KvAccess + ?Sized>(kv: &K, id: &str) {
    match kv.kv_delete(record_key(Partition::Unsigned, id)).await {
        Ok(()) => info!(record_id = %id, "removed unsigned copy of already signed record"),
        Err(err) => {
            warn!(record_id = %id, error = %err, "failed to remove unsigned copy of signed record");
        },
    }
}

/// Inserts `record` into the signed partition unless a signed copy exists.
async fn insert_signed<K: KvAccess + ?Sized>(kv: &K, record: &Record) -> StorageResult<()> {
    let key = record_key(Partition::Signed, &record.id);
    if kv.kv_get(&key).await?.is_some() {
        debug!(record_id = %record.id, "record already signed, keeping existing signature");
        return Ok(());
    }
    kv.kv_set(key, encode(record)?).await
}

async fn write_one<K: KvAccess + ?Sized>(kv: &K, record: &Record) -> StorageResult<()> {
    insert_signed(kv, record).await?;
    kv.kv_delete(record_key(Partition::Unsigned, &record.id)).await?;
    debug!(record_id = %record.id, "moved record to signed partition");
    Ok(())
}

async fn write_many<K: KvAccess + ?Sized>(kv: &K, records: &[Record]) -> StorageResult<()> {
    for record in records {
        insert_signed(kv, record).await?;
    }
    debug!(inserted = records.len(), "bulk insert into signed partition");

    fail_point!("write-batch-after-insert", |_| {
        Err(StorageError::internal("injected failure after bulk insert"))
    });

    for record in records {
        kv.kv_delete(record_key(Partition::Unsigned, &record.id)).await?;
    }
    info!(records = records.len(), "bulk write moved records to signed partition");
    Ok(())
}

async fn read_metadata<K: KvAccess + ?Sized>(
    kv: &K,
    key_id: &str,
) -> StorageResult<Option<SigningKeyMetadata>> {
    kv.kv_get(&metadata_key(key_id)).await?.map(|bytes| decode(&bytes)).transpose()
}

async fn write_metadata<K: KvAccess + ?Sized>(
    kv: &K,
    metadata: &SigningKeyMetadata,
) -> StorageResult<()> {
    kv.kv_set(metadata_key(&metadata.id), encode(metadata)?).await
}

/// [`MessageStore`] over any [`StorageBackend`].
///
/// # Example
///
/// ```
/// use msgsign_storage::{
///     KvMessageStore, MemoryBackend, Partition, Record, RecordStore, ShardSpec,
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = KvMessageStore::new(MemoryBackend::new());
/// store.put_unsigned(&Record::unsigned("0100000000000000", "hello")).await.unwrap();
///
/// let batch = store.read_batch(ShardSpec::new(0, 1).unwrap()).await.unwrap();
/// assert_eq!(batch.len(), 1);
/// assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct KvMessageStore<B> {
    backend: B,
}

impl<B: StorageBackend> KvMessageStore<B> {
    /// Creates a message store over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Adds a record to the unsigned partition.
    ///
    /// This is the entry point of upstream record producers.
    pub async fn put_unsigned(&self, record: &Record) -> StorageResult<()> {
        self.backend.set(record_key(Partition::Unsigned, &record.id), encode(record)?).await
    }

    /// Fetches the record `id` from `partition`.
    pub async fn get_record(&self, partition: Partition, id: &str) -> StorageResult<Option<Record>> {
        self.backend.get(&record_key(partition, id)).await?.map(|bytes| decode(&bytes)).transpose()
    }

    /// Lists every record in `partition`, ordered by id.
    pub async fn list_records(&self, partition: Partition) -> StorageResult<Vec<Record>> {
        scan_partition(self, partition).await
    }
}

#[async_trait]
impl<B: StorageBackend> KvAccess for KvMessageStore<B> {
    async fn kv_get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.backend.get(key).await
    }

    async fn kv_scan(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        self.backend.get_range(prefix_range(prefix)).await
    }

    async fn kv_set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.backend.set(key, value).await
    }

    async fn kv_delete(&self, key: Vec<u8>) -> StorageResult<()> {
        self.backend.delete(&key).await
    }
}

#[async_trait]
impl<B: StorageBackend> RecordStore for KvMessageStore<B> {
    #[tracing::instrument(skip(self))]
    async fn record_count(&self, partition: Partition) -> StorageResult<usize> {
        count_records(self, partition).await
    }

    #[tracing::instrument(skip(self), fields(shard = %shard))]
    async fn read_batch(&self, shard: ShardSpec) -> StorageResult<Vec<Record>> {
        read_shard(self, shard).await
    }

    #[tracing::instrument(skip_all, fields(record_id = %record.id))]
    async fn write_record(&self, record: &Record) -> StorageResult<()> {
        write_one(self, record).await
    }

    #[tracing::instrument(skip_all, fields(records = records.len()))]
    async fn write_batch(&self, records: &[Record]) -> StorageResult<()> {
        write_many(self, records).await
    }

    #[tracing::instrument(skip(self))]
    async fn read_signing_key_metadata(
        &self,
        key_id: &str,
    ) -> StorageResult<Option<SigningKeyMetadata>> {
        read_metadata(self, key_id).await
    }

    #[tracing::instrument(skip_all, fields(key_id = %metadata.id, nonce = metadata.nonce))]
    async fn write_signing_key_metadata(
        &self,
        metadata: &SigningKeyMetadata,
    ) -> StorageResult<()> {
        write_metadata(self, metadata).await
    }
}

#[async_trait]
impl<B: StorageBackend> MessageStore for KvMessageStore<B> {
    #[tracing::instrument(skip(self))]
    async fn begin_unit(&self) -> StorageResult<Box<dyn MessageUnit>> {
        let txn = self.backend.transaction().await?;
        Ok(Box::new(KvMessageUnit::new(txn)))
    }
}

/// A [`MessageUnit`] backed by a storage transaction.
pub struct KvMessageUnit {
    txn: tokio::sync::Mutex<Box<dyn Transaction>>,
    /// Set by the first failed operation.
    aborted: Mutex<Option<String>>,
}

impl KvMessageUnit {
    fn new(txn: Box<dyn Transaction>) -> Self {
        Self { txn: tokio::sync::Mutex::new(txn), aborted: Mutex::new(None) }
    }

    /// Returns `true` once an operation of this unit has failed.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.lock().is_some()
    }

    async fn guarded<T, F>(&self, operation: &str, work: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>> + Send,
    {
        let aborted = self.aborted.lock().clone();
        if let Some(reason) = aborted {
            return Err(StorageError::unit_aborted(reason));
        }

        let result = work.await;
        if let Err(err) = &result {
            let mut aborted = self.aborted.lock();
            if aborted.is_none() {
                debug!(operation, error = %err, "operation failed, aborting unit");
                *aborted = Some(format!("{operation} failed: {err}"));
            }
        }
        result
    }
}

#[async_trait]
impl KvAccess for KvMessageUnit {
    async fn kv_get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.txn.lock().await.get(key).await
    }

    async fn kv_scan(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        self.txn.lock().await.get_range(prefix_range(prefix)).await
    }

    async fn kv_set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.txn.lock().await.set(key, value).await
    }

    async fn kv_delete(&self, key: Vec<u8>) -> StorageResult<()> {
        self.txn.lock().await.delete(key).await
    }
}

#[async_trait]
impl RecordStore for KvMessageUnit {
    async fn record_count(&self, partition: Partition) -> StorageResult<usize> {
        self.guarded("record_count", count_records(self, partition)).await
    }

    async fn read_batch(&self, shard: ShardSpec) -> StorageResult<Vec<Record>> {
        self.guarded("read_batch", read_shard(self, shard)).await
    }

    async fn write_record(&self, record: &Record) -> StorageResult<()> {
        self.guarded("write_record", write_one(self, record)).await
    }

    async fn write_batch(&self, records: &[Record]) -> StorageResult<()> {
        self.guarded("write_batch", write_many(self, records)).await
    }

    async fn read_signing_key_metadata(
        &self,
        key_id: &str,
    ) -> StorageResult<Option<SigningKeyMetadata>> {
        self.guarded("read_signing_key_metadata", read_metadata(self, key_id)).await
    }

    async fn write_signing_key_metadata(
        &self,
        metadata: &SigningKeyMetadata,
    ) -> StorageResult<()> {
        self.guarded("write_signing_key_metadata", write_metadata(self, metadata)).await
    }
}

#[async_trait]
impl MessageUnit for KvMessageUnit {
    #[tracing::instrument(skip_all)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let KvMessageUnit { txn, aborted } = *self;
        if let Some(reason) = aborted.into_inner() {
            return Err(StorageError::unit_aborted(reason));
        }

        fail_point!("unit-before-commit", |_| {
            Err(StorageError::internal("injected failure before unit commit"))
        });

        txn.into_inner().commit().await
    }

    async fn close(self: Box<Self>) {
        debug!(aborted = self.is_aborted(), "closing unit without commit");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn id_for(value: u64) -> String {
        hex::encode(value.to_le_bytes())
    }

    fn signed(record: &Record, salt: &str) -> Record {
        Record {
            signature: format!("sig-{}", record.id),
            salt: salt.to_owned(),
            key_id: "k1".to_owned(),
            ..record.clone()
        }
    }

    async fn seeded_store(count: u64) -> KvMessageStore<MemoryBackend> {
        let store = KvMessageStore::new(MemoryBackend::new());
        for value in 0..count {
            store.put_unsigned(&Record::unsigned(id_for(value), format!("msg-{value}"))).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_counts_per_partition() {
        let store = seeded_store(4).await;
        assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 4);
        assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_batch_selects_shard_in_id_order() {
        let store = seeded_store(6).await;
        let batch = store.read_batch(ShardSpec::new(1, 3).unwrap()).await.unwrap();
        let ids: Vec<String> = batch.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![id_for(1), id_for(4)]);
    }

    #[tokio::test]
    async fn test_write_batch_moves_records() {
        let store = seeded_store(3).await;
        let batch = store.read_batch(ShardSpec::new(0, 1).unwrap()).await.unwrap();
        let signed: Vec<Record> = batch.iter().map(|r| signed(r, "0")).collect();

        store.write_batch(&signed).await.unwrap();

        assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 0);
        assert_eq!(store.list_records(Partition::Signed).await.unwrap(), signed);
    }

    #[tokio::test]
    async fn test_write_record_is_idempotent() {
        let store = seeded_store(1).await;
        let record = signed(&Record::unsigned(id_for(0), "msg-0"), "4");

        store.write_record(&record).await.unwrap();
        store.write_record(&record).await.unwrap();

        assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 1);
        assert_eq!(store.get_record(Partition::Unsigned, &record.id).await.unwrap(), None);
        assert_eq!(store.get_record(Partition::Signed, &record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_signed_record_is_never_replaced() {
        let store = seeded_store(1).await;
        let unsigned = Record::unsigned(id_for(0), "msg-0");
        let first = signed(&unsigned, "0");
        let key = record_key(Partition::Signed, &first.id);
        store.backend().set(key, encode(&first).unwrap()).await.unwrap();

        assert!(store.read_batch(ShardSpec::new(0, 1).unwrap()).await.unwrap().is_empty());
        assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 0);

        store.write_record(&signed(&unsigned, "7")).await.unwrap();
        assert_eq!(store.get_record(Partition::Signed, &first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_read_batch_skips_undecodable_documents() {
        let store = seeded_store(2).await;
        let key = record_key(Partition::Unsigned, &id_for(5));
        store.backend().set(key, b"{".to_vec()).await.unwrap();

        let batch = store.read_batch(ShardSpec::new(0, 1).unwrap()).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(store.list_records(Partition::Unsigned).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_absent_until_written() {
        let store = seeded_store(0).await;
        assert_eq!(store.read_signing_key_metadata("k1").await.unwrap(), None);

        let metadata = SigningKeyMetadata { id: "k1".into(), nonce: 9 };
        store.write_signing_key_metadata(&metadata).await.unwrap();
        assert_eq!(store.read_signing_key_metadata("k1").await.unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_a_serialization_error() {
        let store = seeded_store(0).await;
        store.backend().set(metadata_key("k1"), b"not json".to_vec()).await.unwrap();

        let result = store.read_signing_key_metadata("k1").await;
        assert!(matches!(result, Err(StorageError::Serialization { .. })));
    }

    #[tokio::test]
    async fn test_unit_effects_invisible_until_commit() {
        let store = seeded_store(2).await;
        let unit = store.begin_unit().await.unwrap();

        let batch = unit.read_batch(ShardSpec::new(0, 1).unwrap()).await.unwrap();
        let signed: Vec<Record> = batch.iter().map(|r| signed(r, "0")).collect();
        unit.write_batch(&signed).await.unwrap();
        unit.write_signing_key_metadata(&SigningKeyMetadata { id: "k1".into(), nonce: 2 })
            .await
            .unwrap();

        // The unit sees its own writes, the store does not
        assert_eq!(unit.record_count(Partition::Signed).await.unwrap(), 2);
        assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 0);

        unit.commit().await.unwrap();
        assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 2);
        assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 0);
        assert_eq!(store.read_signing_key_metadata("k1").await.unwrap().unwrap().nonce, 2);
    }

    #[tokio::test]
    async fn test_closed_unit_discards_effects() {
        let store = seeded_store(1).await;
        let unit = store.begin_unit().await.unwrap();
        unit.write_record(&signed(&Record::unsigned(id_for(0), "msg-0"), "0")).await.unwrap();
        unit.close().await;

        assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 1);
        assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_units_conflict_on_same_metadata() {
        let store = seeded_store(0).await;
        let first = store.begin_unit().await.unwrap();
        let second = store.begin_unit().await.unwrap();

        first.write_signing_key_metadata(&SigningKeyMetadata { id: "k1".into(), nonce: 1 }).await.unwrap();
        second.write_signing_key_metadata(&SigningKeyMetadata { id: "k1".into(), nonce: 1 }).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StorageError::Conflict)));
    }
}
