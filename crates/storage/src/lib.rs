//! Record and key-metadata storage for the msgsign batch signer.
//!
//! This crate provides the persistence layer of the signer: a byte-oriented
//! [`StorageBackend`] with snapshot transactions, and the [`MessageStore`]
//! repository that maps the unsigned and signed record partitions and the
//! per-key nonce metadata onto it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Signing rounds                         │
//! │            (msgsign-signer BatchSigner, scheduler)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     Repository Layer                        │
//! │       MessageStore / MessageUnit (records, key nonces)      │
//! │             KvMessageStore: JSON documents + shards         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   StorageBackend trait                      │
//! │        (get, set, delete, get_range, transaction)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      MemoryBackend                          │
//! │              (MVCC snapshots, first commit wins)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use msgsign_storage::{
//!     KvMessageStore, MemoryBackend, MessageStore, Partition, Record, RecordStore, ShardSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = KvMessageStore::new(MemoryBackend::new());
//!     store.put_unsigned(&Record::unsigned("0200000000000000", "hello")).await?;
//!
//!     // Units see their own writes and publish them atomically
//!     let unit = store.begin_unit().await?;
//!     let mut batch = unit.read_batch(ShardSpec::new(0, 1)?).await?;
//!     for record in &mut batch {
//!         record.signature = "00".into();
//!         record.salt = "0".into();
//!         record.key_id = "k1".into();
//!     }
//!     unit.write_batch(&batch).await?;
//!     unit.commit().await?;
//!
//!     assert_eq!(store.record_count(Partition::Signed).await?, 1);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Backends map their internal
//! errors to [`StorageError`] variants; the message store adds
//! [`StorageError::Serialization`] for unreadable documents and
//! [`StorageError::UnitAborted`] for operations on a failed unit.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (record builders,
//!   seeded stores, a fault-injecting backend, assertion macros). Enable this in
//!   `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Compiles the `write-batch-after-insert` and `unit-before-commit` fail
//!   points.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod kv_store;
pub mod memory;
pub mod message_store;
pub mod shard;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::{KeyRange, StorageBackend};
pub use error::{BoxError, StorageError, StorageResult};
pub use kv_store::{KvMessageStore, KvMessageUnit};
pub use memory::MemoryBackend;
pub use message_store::{MessageStore, MessageUnit, RecordStore};
pub use shard::{ShardError, ShardSpec};
pub use transaction::Transaction;
pub use types::{KeyValue, Partition, Record, SigningKeyMetadata};
