//! Transaction coordinator.
//!
//! Runs a [`UnitOfWork`] against the message store in one of two modes:
//!
//! - [`UnitMode::Transactional`]: the work runs inside a store unit with snapshot reads and an
//!   all-or-nothing commit. A commit that loses a write conflict re-executes the work from
//!   scratch in a fresh unit, up to `max_attempts` times.
//! - [`UnitMode::Direct`]: the work runs directly against the store. A failure part way through
//!   leaves whatever was already written.
//!
//! # Backoff Strategy
//!
//! Retries use exponential backoff with jitter:
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added so that replicas that conflicted with
//!   each other do not retry in lockstep

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fail::fail_point;
use msgsign_storage::{MessageStore, RecordStore, StorageError};
use rand::Rng;

use crate::{
    config::UnitRetryConfig,
    error::{SignerError, SignerResult},
    metrics::SignerMetrics,
};

/// How units are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    /// Atomic units with conflict retry.
    Transactional,
    /// Best-effort sequential operations.
    Direct,
}

impl UnitMode {
    /// Returns the mode for the `transactional` configuration flag.
    #[must_use]
    pub fn from_transactional(transactional: bool) -> Self {
        if transactional { Self::Transactional } else { Self::Direct }
    }
}

/// A read-sign-write body that can be executed more than once.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Value produced by a successful execution.
    type Output: Send;

    /// Executes the body against `store`.
    ///
    /// In transactional mode `store` is an open unit, and the body may run
    /// again from the start if the unit loses a write conflict.
    async fn run(&self, store: &dyn RecordStore) -> SignerResult<Self::Output>;
}

/// Executes units of work in the configured [`UnitMode`].
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn MessageStore>,
    mode: UnitMode,
    retry: UnitRetryConfig,
    metrics: Option<Arc<SignerMetrics>>,
}

impl TransactionCoordinator {
    /// Creates a coordinator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, mode: UnitMode, retry: UnitRetryConfig) -> Self {
        Self { store, mode, retry, metrics: None }
    }

    /// Counts retries in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SignerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the execution mode.
    #[must_use]
    pub fn mode(&self) -> UnitMode {
        self.mode
    }

    /// Runs `work` once to completion.
    ///
    /// # Errors
    ///
    /// - any error returned by `work`; in transactional mode nothing it did is visible
    /// - [`SignerError::RetriesExhausted`] if every transactional attempt lost a write conflict
    /// - [`SignerError::Storage`] if a unit cannot be opened or committed
    pub async fn run_unit<W>(&self, work: &W) -> SignerResult<W::Output>
    where
        W: UnitOfWork + ?Sized,
    {
        match self.mode {
            UnitMode::Direct => work.run(&*self.store).await,
            UnitMode::Transactional => self.run_transactional(work).await,
        }
    }

    async fn run_transactional<W>(&self, work: &W) -> SignerResult<W::Output>
    where
        W: UnitOfWork + ?Sized,
    {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let unit = self.store.begin_unit().await?;
            let output = match work.run(&*unit).await {
                Ok(output) => output,
                Err(err) => {
                    unit.close().await;
                    return Err(err);
                },
            };

            match unit.commit().await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::debug!(attempt = attempt + 1, "unit committed after retry");
                    }
                    return Ok(output);
                },
                Err(StorageError::Conflict) if attempt + 1 < max_attempts => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_unit_retry();
                    }
                    let delay = compute_backoff(&self.retry, attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "unit commit conflict, retrying after backoff",
                    );
                    fail_point!("unit-retry-before-sleep");
                    tokio::time::sleep(delay).await;
                },
                Err(StorageError::Conflict) => break,
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(max_attempts, "unit retries exhausted");
        Err(SignerError::RetriesExhausted { attempts: max_attempts })
    }
}

/// Computes the backoff duration before retrying after `attempt`.
///
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..50% of delay)`
fn compute_backoff(config: &UnitRetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}
