//! Sharded batch signing for msgsign.
//!
//! Several signer replicas share one message store without talking to each
//! other. Each replica owns a shard of the unsigned records, derived from its
//! [`WorkerIdentity`] and the record identifiers alone, and periodically signs
//! that shard with a rotating key. Every signature is salted with the key's
//! next nonce so that no two records signed by one key share a salt.
//!
//! # Architecture
//!
//! ```text
//! PeriodicScheduler ──tick──▶ KeyRotation ──BatchAssignment──▶ BatchSigner
//!                                                                 │ spawn
//!                                                                 ▼
//!                                   TransactionCoordinator ◀── signing round
//!                                   (transactional | direct)      │
//!                                                                 ▼
//!                          MessageStore: read shard ─▶ sign with nonce salts
//!                                        ─▶ bulk write (or per-record fallback)
//!                                        ─▶ persist nonce
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use msgsign_keys::MemoryKeyStore;
//! use msgsign_signer::{BatchSigner, PeriodicScheduler, SignerConfig};
//! use msgsign_storage::{KvMessageStore, MemoryBackend};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(KvMessageStore::new(MemoryBackend::new()));
//!     let keys = Arc::new(MemoryKeyStore::generate(3));
//!     let config = SignerConfig::builder()
//!         .worker_identity("signer-1")
//!         .total_signers(3)
//!         .transactional(true)
//!         .build()?;
//!
//!     let signer = Arc::new(BatchSigner::new(store, keys, config).await?);
//!     let token = CancellationToken::new();
//!     let scheduler = PeriodicScheduler::new(Arc::clone(&signer)).spawn(token.clone());
//!
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     token.cancel();
//!     scheduler.await?;
//!     println!("{:?}", signer.stats().await?);
//!     Ok(())
//! }
//! ```
//!
//! # Consistency
//!
//! With `transactional` enabled each round is one atomic unit: a failed round
//! leaves nothing behind, and two rounds that advanced the same key's nonce
//! cannot both commit; the loser is re-executed. Without it, rounds write
//! directly and a failure part way can leave records in both partitions or
//! lose a nonce update. Within one process, rounds on the same key are
//! serialized unless `serialize_rounds_per_key` is disabled.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Compiles the `unit-retry-before-sleep` fail point, and the storage fail
//!   points of `msgsign-storage`.

#![deny(unsafe_code)]

pub mod batch_signer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod nonce;
pub mod rotation;
pub mod scheduler;
pub mod stats;

pub use batch_signer::{BatchSigner, RoundHandle, RoundOutcome, RoundReport, SignerState};
pub use config::{SignerConfig, UnitRetryConfig};
pub use coordinator::{TransactionCoordinator, UnitMode, UnitOfWork};
pub use error::{ConfigError, SignerError, SignerResult};
pub use identity::WorkerIdentity;
pub use metrics::{SignerMetrics, SignerMetricsSnapshot};
pub use nonce::NonceAllocator;
pub use rotation::{BatchAssignment, KeyRotation, plan_assignments};
pub use scheduler::PeriodicScheduler;
pub use stats::{SignerStats, get_stats};
