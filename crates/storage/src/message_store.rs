//! Message store capability traits.
//!
//! The signing pipeline talks to persistence through three traits:
//!
//! - [`RecordStore`]: the record and key-metadata operations a signing round needs. Both the
//!   store itself and an open unit implement it, so the same round body runs with or without
//!   atomicity.
//! - [`MessageStore`]: a [`RecordStore`] that can additionally open units.
//! - [`MessageUnit`]: a [`RecordStore`] view whose effects become visible only on
//!   [`commit`](MessageUnit::commit); dropping or [`close`](MessageUnit::close)-ing it discards
//!   them.
//!
//! ```text
//! ┌───────────────────────────────┐
//! │         signing round         │
//! │       (&dyn RecordStore)      │
//! ├───────────────┬───────────────┤
//! │ MessageStore  │  MessageUnit  │
//! │   (direct)    │   (atomic)    │
//! ├───────────────┴───────────────┤
//! │        StorageBackend         │
//! └───────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::{
    error::StorageResult,
    shard::ShardSpec,
    types::{Partition, Record, SigningKeyMetadata},
};

/// Record and key-metadata operations used by a signing round.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Counts the records in `partition`.
    async fn record_count(&self, partition: Partition) -> StorageResult<usize>;

    /// Reads the unsigned records that belong to `shard`, ordered by id.
    ///
    /// Records with identifiers that cannot be sharded are skipped.
    async fn read_batch(&self, shard: ShardSpec) -> StorageResult<Vec<Record>>;

    /// Upserts `record` into the signed partition, then removes it from the
    /// unsigned partition.
    ///
    /// The delete is only issued once the insert succeeded, so a failure never
    /// orphans the record.
    async fn write_record(&self, record: &Record) -> StorageResult<()>;

    /// Inserts all `records` into the signed partition, then deletes all of
    /// them from the unsigned partition.
    ///
    /// Outside a unit a failure part way through leaves the inserts that
    /// already happened in place.
    async fn write_batch(&self, records: &[Record]) -> StorageResult<()>;

    /// Reads the nonce metadata of `key_id`, `None` if the key was never used.
    async fn read_signing_key_metadata(
        &self,
        key_id: &str,
    ) -> StorageResult<Option<SigningKeyMetadata>>;

    /// Upserts nonce metadata.
    async fn write_signing_key_metadata(&self, metadata: &SigningKeyMetadata)
    -> StorageResult<()>;
}

/// Persistent message store that can open atomic units.
#[async_trait]
pub trait MessageStore: RecordStore {
    /// Opens a unit with snapshot reads and all-or-nothing commit.
    async fn begin_unit(&self) -> StorageResult<Box<dyn MessageUnit>>;
}

/// An open atomic unit of record operations.
#[async_trait]
pub trait MessageUnit: RecordStore {
    /// Commits every effect of the unit atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) when a concurrent writer
    ///   committed first; the unit should be re-executed from scratch
    /// - [`StorageError::UnitAborted`](crate::StorageError::UnitAborted) when an operation inside
    ///   the unit failed
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Ends the unit, discarding its effects.
    async fn close(self: Box<Self>);
}
