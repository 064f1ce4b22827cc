//! Signing round metrics.
//!
//! [`SignerMetrics`] is a set of monotonically increasing counters shared by
//! every round of one [`BatchSigner`](crate::BatchSigner). All atomics use
//! `Ordering::Relaxed`: each counter is independent, and a
//! [`snapshot`](SignerMetrics::snapshot) may observe one round's counters only
//! partly applied.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use msgsign_signer::SignerMetrics;
//!
//! let metrics = SignerMetrics::new();
//! metrics.record_round_started();
//! metrics.record_records_signed(3);
//! metrics.record_round_committed(Duration::from_millis(4));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.rounds_committed, 1);
//! assert_eq!(snapshot.records_signed, 3);
//! assert_eq!(snapshot.rounds_in_flight(), 0);
//! ```

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;

/// Counters of one signer.
#[derive(Debug, Default)]
pub struct SignerMetrics {
    rounds_started: AtomicU64,
    rounds_committed: AtomicU64,
    rounds_partially_written: AtomicU64,
    rounds_aborted: AtomicU64,
    records_signed: AtomicU64,
    signing_failures: AtomicU64,
    write_failures: AtomicU64,
    unit_retries: AtomicU64,
    round_latency_us: AtomicU64,
}

impl SignerMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a round began executing.
    pub fn record_round_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a round whose writes all landed.
    pub fn record_round_committed(&self, duration: Duration) {
        self.rounds_committed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    /// Records a round that fell back to per-record writes and lost some of them.
    pub fn record_round_partially_written(&self, duration: Duration) {
        self.rounds_partially_written.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    /// Records a round that ended in an error.
    pub fn record_round_aborted(&self, duration: Duration) {
        self.rounds_aborted.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    /// Adds `count` records moved to the signed partition.
    pub fn record_records_signed(&self, count: u64) {
        self.records_signed.fetch_add(count, Ordering::Relaxed);
    }

    /// Adds `count` records that could not be signed.
    pub fn record_signing_failures(&self, count: u64) {
        self.signing_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Adds `count` signed records that could not be written.
    pub fn record_write_failures(&self, count: u64) {
        self.write_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Records one re-execution of a unit after a write conflict.
    pub fn record_unit_retry(&self) {
        self.unit_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, duration: Duration) {
        self.round_latency_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> SignerMetricsSnapshot {
        SignerMetricsSnapshot {
            rounds_started: self.rounds_started.load(Ordering::Relaxed),
            rounds_committed: self.rounds_committed.load(Ordering::Relaxed),
            rounds_partially_written: self.rounds_partially_written.load(Ordering::Relaxed),
            rounds_aborted: self.rounds_aborted.load(Ordering::Relaxed),
            records_signed: self.records_signed.load(Ordering::Relaxed),
            signing_failures: self.signing_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            unit_retries: self.unit_retries.load(Ordering::Relaxed),
            round_latency_us: self.round_latency_us.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.rounds_started,
            &self.rounds_committed,
            &self.rounds_partially_written,
            &self.rounds_aborted,
            &self.records_signed,
            &self.signing_failures,
            &self.write_failures,
            &self.unit_retries,
            &self.round_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`SignerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignerMetricsSnapshot {
    /// Rounds that began executing.
    pub rounds_started: u64,
    /// Rounds that ended [`Committed`](crate::RoundOutcome::Committed).
    pub rounds_committed: u64,
    /// Rounds that ended [`PartiallyWritten`](crate::RoundOutcome::PartiallyWritten).
    pub rounds_partially_written: u64,
    /// Rounds that ended [`Aborted`](crate::RoundOutcome::Aborted).
    pub rounds_aborted: u64,
    /// Records moved to the signed partition.
    pub records_signed: u64,
    /// Records skipped because signing failed.
    pub signing_failures: u64,
    /// Signed records that could not be written.
    pub write_failures: u64,
    /// Unit re-executions after write conflicts.
    pub unit_retries: u64,
    /// Cumulative wall time of finished rounds, in microseconds.
    pub round_latency_us: u64,
}

impl SignerMetricsSnapshot {
    /// Returns the number of finished rounds.
    #[must_use]
    pub fn rounds_finished(&self) -> u64 {
        self.rounds_committed + self.rounds_partially_written + self.rounds_aborted
    }

    /// Returns rounds started but not yet finished.
    #[must_use]
    pub fn rounds_in_flight(&self) -> u64 {
        self.rounds_started.saturating_sub(self.rounds_finished())
    }

    /// Returns the mean wall time of finished rounds in microseconds, or 0.0 if none finished.
    #[must_use]
    pub fn avg_round_latency_us(&self) -> f64 {
        match self.rounds_finished() {
            0 => 0.0,
            finished => self.round_latency_us as f64 / finished as f64,
        }
    }
}
