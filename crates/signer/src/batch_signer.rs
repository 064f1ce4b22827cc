//! Batch signing rounds.
//!
//! A [`BatchSigner`] runs signing rounds for one replica. A round reads the
//! replica's shard of unsigned records, signs each record with the assigned
//! key salted by the key's next nonce, moves the signed records to the signed
//! partition and persists the advanced nonce. Rounds run through the
//! [`TransactionCoordinator`], atomically or directly depending on
//! configuration.
//!
//! Rounds are fire-and-forget: [`BatchSigner::sign_batch`] spawns the round
//! and returns a [`RoundHandle`] at once. Dropping the handle detaches the
//! round; awaiting it yields the [`RoundOutcome`].
//!
//! # Round states
//!
//! ```text
//!   Idle ──sign_batch──▶ Signing ──▶ Committed
//!     ▲                     │   ───▶ PartiallyWritten
//!     │                     └─────▶ Aborted
//!     └──────── next tick ◀──────────────┘
//! ```
//!
//! Per-record signing failures leave the record unsigned and do not fail the
//! round. If the bulk write fails, records are written one by one and the ones
//! that still fail stay in the unsigned partition. Any record that does not
//! make it to the signed partition is selected again by a later round.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use async_trait::async_trait;
use msgsign_keys::KeyStore;
use msgsign_storage::{MessageStore, Partition, Record, RecordStore, ShardSpec};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    config::SignerConfig,
    coordinator::{TransactionCoordinator, UnitMode, UnitOfWork},
    error::{SignerError, SignerResult},
    identity::WorkerIdentity,
    metrics::SignerMetrics,
    nonce::NonceAllocator,
    rotation::{BatchAssignment, KeyRotation, plan_assignments},
    stats::{SignerStats, get_stats},
};

/// Whether any round of a signer is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerState {
    /// No round is running.
    Idle,
    /// At least one round is running.
    Signing,
}

/// What a finished round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Key the round signed with.
    pub key_id: String,
    /// Shard the round read.
    pub shard: ShardSpec,
    /// Unsigned records selected from the shard.
    pub selected: usize,
    /// Records signed.
    pub signed: usize,
    /// Records skipped because signing failed.
    pub signing_failures: usize,
    /// Signed records written to the signed partition.
    pub written: usize,
    /// Signed records whose individual write failed.
    pub write_failures: usize,
    /// Nonce of the key before the round, 0 if the shard was empty.
    pub nonce_start: u64,
    /// Nonce of the key after the round, 0 if the shard was empty.
    pub nonce_end: u64,
    /// Whether the bulk write failed and records were written one by one.
    pub fallback: bool,
}

impl RoundReport {
    fn new(key_id: &str, shard: ShardSpec) -> Self {
        Self {
            key_id: key_id.to_owned(),
            shard,
            selected: 0,
            signed: 0,
            signing_failures: 0,
            written: 0,
            write_failures: 0,
            nonce_start: 0,
            nonce_end: 0,
            fallback: false,
        }
    }
}

/// Terminal state of one round.
#[derive(Debug)]
pub enum RoundOutcome {
    /// Every signed record was written.
    Committed(RoundReport),
    /// The bulk write failed and some records could not be written individually either.
    PartiallyWritten(RoundReport),
    /// The round failed. In transactional mode none of its effects are visible.
    Aborted(SignerError),
}

impl RoundOutcome {
    /// Returns the report of a round that was not aborted.
    #[must_use]
    pub fn report(&self) -> Option<&RoundReport> {
        match self {
            Self::Committed(report) | Self::PartiallyWritten(report) => Some(report),
            Self::Aborted(_) => None,
        }
    }

    /// Returns the error of an aborted round.
    #[must_use]
    pub fn error(&self) -> Option<&SignerError> {
        match self {
            Self::Aborted(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` for [`RoundOutcome::Committed`].
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Returns the outcome name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed(_) => "committed",
            Self::PartiallyWritten(_) => "partially_written",
            Self::Aborted(_) => "aborted",
        }
    }
}

/// Handle of a spawned round.
///
/// Dropping the handle does not cancel the round.
#[derive(Debug)]
pub struct RoundHandle {
    assignment: BatchAssignment,
    task: JoinHandle<RoundOutcome>,
}

impl RoundHandle {
    /// Returns what the round was asked to do.
    #[must_use]
    pub fn assignment(&self) -> &BatchAssignment {
        &self.assignment
    }

    /// Returns `true` once the round has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the round to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::RoundFailed`] if the round task panicked or was cancelled.
    pub async fn wait(self) -> SignerResult<RoundOutcome> {
        self.task.await.map_err(|err| SignerError::RoundFailed { reason: err.to_string() })
    }
}

/// Decrements the active round count when a round ends, however it ends.
struct ActiveRound(Arc<AtomicUsize>);

impl ActiveRound {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveRound {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The read-sign-write body of one round.
struct SigningRound<'a> {
    keys: &'a dyn KeyStore,
    key_id: &'a str,
    shard: ShardSpec,
}

#[async_trait]
impl UnitOfWork for SigningRound<'_> {
    type Output = RoundReport;

    async fn run(&self, store: &dyn RecordStore) -> SignerResult<RoundReport> {
        let mut report = RoundReport::new(self.key_id, self.shard);

        let candidates = store.read_batch(self.shard).await?;
        report.selected = candidates.len();
        if candidates.is_empty() {
            debug!("no unsigned records in shard");
            return Ok(report);
        }

        let signer = self.keys.get_key(self.key_id).await?;
        let mut nonce = NonceAllocator::load(store, self.key_id).await?;
        report.nonce_start = nonce.start();

        let mut signed: Vec<Record> = Vec::with_capacity(candidates.len());
        for mut record in candidates {
            let salt = nonce.salt();
            match signer.sign(&format!("{salt}{}", record.msg)) {
                Ok(signature) => {
                    record.signature = signature;
                    record.salt = salt;
                    record.key_id = self.key_id.to_owned();
                    nonce.advance();
                    signed.push(record);
                },
                Err(err) => {
                    warn!(record_id = %record.id, salt, error = %err, "failed to sign record");
                    report.signing_failures += 1;
                },
            }
        }
        report.signed = signed.len();

        if !signed.is_empty() {
            match store.write_batch(&signed).await {
                Ok(()) => report.written = signed.len(),
                Err(err) => {
                    warn!(
                        records = signed.len(),
                        error = %err,
                        "bulk write failed, writing records individually"
                    );
                    report.fallback = true;
                    for record in &signed {
                        match store.write_record(record).await {
                            Ok(()) => report.written += 1,
                            Err(err) => {
                                warn!(
                                    record_id = %record.id,
                                    error = %err,
                                    "failed to write signed record"
                                );
                                report.write_failures += 1;
                            },
                        }
                    }
                },
            }
        }

        nonce.persist(store).await?;
        report.nonce_end = nonce.current();
        Ok(report)
    }
}

/// Runs signing rounds for one replica.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use msgsign_keys::{MemoryKeyStore, SigningKey};
/// use msgsign_signer::{BatchSigner, SignerConfig};
/// use msgsign_storage::{KvMessageStore, MemoryBackend, Partition, Record, RecordStore};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(KvMessageStore::new(MemoryBackend::new()));
/// store.put_unsigned(&Record::unsigned("0000000000000000", "hello")).await?;
///
/// let keys = MemoryKeyStore::new();
/// keys.insert(SigningKey::generate().with_key_id("k0"));
/// let config = SignerConfig::builder().worker_identity("signer-0").total_signers(1).build()?;
/// let signer = Arc::new(BatchSigner::new(store.clone(), Arc::new(keys), config).await?);
///
/// let outcome = signer.sign_batch(0, 1, "k0")?.wait().await?;
/// assert!(outcome.is_committed());
/// assert_eq!(store.record_count(Partition::Signed).await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct BatchSigner {
    store: Arc<dyn MessageStore>,
    keys: Arc<dyn KeyStore>,
    identity: WorkerIdentity,
    rotation: KeyRotation,
    config: SignerConfig,
    coordinator: TransactionCoordinator,
    metrics: Arc<SignerMetrics>,
    active_rounds: Arc<AtomicUsize>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BatchSigner {
    /// Starts a signer for the replica named by `config`.
    ///
    /// # Errors
    ///
    /// All of these are fatal; the signer must not be retried with the same inputs:
    /// - [`SignerError::Config`] if `config` fails validation
    /// - [`SignerError::InvalidIdentity`] / [`SignerError::ShardOutOfRange`] for a bad identity
    /// - [`SignerError::InsufficientKeys`] if the key store has fewer keys than replicas
    /// - [`SignerError::Key`] if the key identifiers cannot be listed
    pub async fn new(
        store: Arc<dyn MessageStore>,
        keys: Arc<dyn KeyStore>,
        config: SignerConfig,
    ) -> SignerResult<Self> {
        config.validate()?;
        let identity = WorkerIdentity::parse(config.worker_identity(), config.total_signers())?;

        let key_ids = keys.key_ids().await?;
        if (key_ids.len() as u64) < identity.total_shards() {
            return Err(SignerError::InsufficientKeys {
                available: key_ids.len(),
                required: identity.total_shards(),
            });
        }
        let rotation = KeyRotation::new(key_ids, &identity)?;

        let metrics = Arc::new(SignerMetrics::new());
        let coordinator = TransactionCoordinator::new(
            Arc::clone(&store),
            UnitMode::from_transactional(config.transactional()),
            config.unit_retry().clone(),
        )
        .with_metrics(Arc::clone(&metrics));

        info!(
            identity = %identity,
            keys = rotation.key_ids().len(),
            transactional = config.transactional(),
            "batch signer started"
        );

        Ok(Self {
            store,
            keys,
            identity,
            rotation,
            config,
            coordinator,
            metrics,
            active_rounds: Arc::new(AtomicUsize::new(0)),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns a round signing shard `shard_index` of `shard_count` with `key_id`.
    ///
    /// Returns as soon as the round is spawned. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`SignerError::ShardOutOfRange`] if `shard_index >= shard_count`
    /// - [`SignerError::UnknownKey`] if `key_id` was not listed by the key store at startup
    pub fn sign_batch(
        self: &Arc<Self>,
        shard_index: u64,
        shard_count: u64,
        key_id: &str,
    ) -> SignerResult<RoundHandle> {
        self.sign_assignment(BatchAssignment::new(key_id, shard_index, shard_count))
    }

    /// Spawns the round described by `assignment`. See [`sign_batch`](Self::sign_batch).
    ///
    /// # Errors
    ///
    /// Same as [`sign_batch`](Self::sign_batch).
    pub fn sign_assignment(
        self: &Arc<Self>,
        assignment: BatchAssignment,
    ) -> SignerResult<RoundHandle> {
        let shard = ShardSpec::new(assignment.shard_index, assignment.shard_count).map_err(|_| {
            SignerError::ShardOutOfRange {
                index: assignment.shard_index,
                count: assignment.shard_count,
            }
        })?;
        if !self.rotation.key_ids().iter().any(|id| *id == assignment.key_id) {
            return Err(SignerError::UnknownKey { key_id: assignment.key_id });
        }

        let signer = Arc::clone(self);
        let key_id = assignment.key_id.clone();
        let task = tokio::spawn(async move { signer.run_round(shard, key_id).await });
        Ok(RoundHandle { assignment, task })
    }

    /// Spawns rounds covering the whole unsigned partition.
    ///
    /// The partition is split into `ceil(unsigned / batch_size)` shards, each
    /// signed by the next key in rotation order.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Storage`] if the unsigned records cannot be counted.
    pub async fn sign_all(self: &Arc<Self>) -> SignerResult<Vec<RoundHandle>> {
        let unsigned = self.store.record_count(Partition::Unsigned).await?;
        let plan = plan_assignments(unsigned, self.config.batch_size(), self.rotation.key_ids());
        info!(unsigned, rounds = plan.len(), "planned signing of all unsigned records");
        plan.into_iter().map(|assignment| self.sign_assignment(assignment)).collect()
    }

    #[tracing::instrument(name = "signing_round", skip(self), fields(shard = %shard))]
    async fn run_round(&self, shard: ShardSpec, key_id: String) -> RoundOutcome {
        // Counted from spawn, so rounds queued on the key lock are visible.
        let _active = ActiveRound::enter(&self.active_rounds);
        let _key_guard = match self.key_lock(&key_id) {
            Some(lock) => Some(lock.lock_owned().await),
            None => None,
        };
        self.metrics.record_round_started();
        let started = Instant::now();

        let work = SigningRound { keys: &*self.keys, key_id: &key_id, shard };
        let outcome = match self.coordinator.run_unit(&work).await {
            Ok(report) if report.fallback && report.write_failures > 0 => {
                RoundOutcome::PartiallyWritten(report)
            },
            Ok(report) => RoundOutcome::Committed(report),
            Err(err) => RoundOutcome::Aborted(err),
        };

        let elapsed = started.elapsed();
        match &outcome {
            RoundOutcome::Committed(report) => {
                self.record_report(report);
                self.metrics.record_round_committed(elapsed);
                info!(
                    selected = report.selected,
                    written = report.written,
                    signing_failures = report.signing_failures,
                    nonce_start = report.nonce_start,
                    nonce_end = report.nonce_end,
                    "signing round committed"
                );
            },
            RoundOutcome::PartiallyWritten(report) => {
                self.record_report(report);
                self.metrics.record_round_partially_written(elapsed);
                warn!(
                    selected = report.selected,
                    written = report.written,
                    write_failures = report.write_failures,
                    signing_failures = report.signing_failures,
                    "signing round partially written"
                );
            },
            RoundOutcome::Aborted(err) => {
                self.metrics.record_round_aborted(elapsed);
                error!(error = %err, "signing round aborted");
            },
        }
        outcome
    }

    fn record_report(&self, report: &RoundReport) {
        self.metrics.record_records_signed(report.written as u64);
        self.metrics.record_signing_failures(report.signing_failures as u64);
        self.metrics.record_write_failures(report.write_failures as u64);
    }

    fn key_lock(&self, key_id: &str) -> Option<Arc<tokio::sync::Mutex<()>>> {
        if !self.config.serialize_rounds_per_key() {
            return None;
        }
        let mut locks = self.key_locks.lock();
        Some(Arc::clone(locks.entry(key_id.to_owned()).or_default()))
    }

    /// Returns a fresh rotation over the startup key list, at tick 0.
    #[must_use]
    pub fn rotation(&self) -> KeyRotation {
        self.rotation.clone()
    }

    /// Returns signed and unsigned record counts.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Storage`] if a count fails.
    pub async fn stats(&self) -> SignerResult<SignerStats> {
        get_stats(&*self.store).await
    }

    /// Returns this replica's identity.
    #[must_use]
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Returns the key identifiers listed at startup, sorted.
    #[must_use]
    pub fn key_ids(&self) -> &[String] {
        self.rotation.key_ids()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Returns the round metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<SignerMetrics> {
        &self.metrics
    }

    /// Returns the number of spawned rounds that have not finished, including
    /// rounds still waiting for their key lock.
    #[must_use]
    pub fn active_rounds(&self) -> usize {
        self.active_rounds.load(Ordering::SeqCst)
    }

    /// Returns [`SignerState::Signing`] while any spawned round is unfinished.
    #[must_use]
    pub fn state(&self) -> SignerState {
        if self.active_rounds() > 0 { SignerState::Signing } else { SignerState::Idle }
    }
}

impl std::fmt::Debug for BatchSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSigner")
            .field("identity", &self.identity)
            .field("key_ids", &self.rotation.key_ids())
            .field("mode", &self.coordinator.mode())
            .field("active_rounds", &self.active_rounds())
            .finish_non_exhaustive()
    }
}
