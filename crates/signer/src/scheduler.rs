//! Periodic scheduling of signing rounds.
//!
//! [`PeriodicScheduler`] fires one round per tick with the next key of the
//! replica's [`KeyRotation`]. Rounds are spawned and not awaited, so a round
//! that outlasts the interval overlaps with the next one. Cancellation is
//! observed between ticks; rounds already spawned run to completion.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    batch_signer::{BatchSigner, RoundHandle},
    error::SignerResult,
    rotation::KeyRotation,
};

/// Drives a [`BatchSigner`] on a fixed interval.
pub struct PeriodicScheduler {
    signer: Arc<BatchSigner>,
    rotation: KeyRotation,
    interval: Duration,
    handles: Option<mpsc::UnboundedSender<RoundHandle>>,
}

impl PeriodicScheduler {
    /// Creates a scheduler ticking at the signer's configured interval, starting at tick 0.
    #[must_use]
    pub fn new(signer: Arc<BatchSigner>) -> Self {
        let rotation = signer.rotation();
        let interval = signer.config().tick_interval();
        Self { signer, rotation, interval, handles: None }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sends the handle of every spawned round to `sink` instead of dropping it.
    ///
    /// Rounds still run whether or not the receiver awaits them.
    #[must_use]
    pub fn with_handle_sink(mut self, sink: mpsc::UnboundedSender<RoundHandle>) -> Self {
        self.handles = Some(sink);
        self
    }

    /// Returns the rotation state; its tick is the next one to fire.
    #[must_use]
    pub fn rotation(&self) -> &KeyRotation {
        &self.rotation
    }

    /// Fires the next rotated round immediately.
    ///
    /// # Errors
    ///
    /// Returns the error of [`BatchSigner::sign_assignment`]; the tick is consumed either way.
    pub fn tick_once(&mut self) -> SignerResult<RoundHandle> {
        let assignment = self.rotation.next_assignment();
        self.signer.sign_assignment(assignment)
    }

    /// Fires a round every interval until `token` is cancelled.
    ///
    /// The first round fires one full interval after the call. Scheduling
    /// errors are logged and the next tick proceeds. Returns the number of
    /// ticks fired.
    pub async fn run(mut self, token: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; consume it so we start
        // with a full interval wait.
        ticker.tick().await;

        let mut fired = 0u64;
        info!(
            identity = %self.signer.identity(),
            interval_ms = self.interval.as_millis() as u64,
            "signing scheduler started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(ticks = fired, "signing scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let tick = self.rotation.tick();
                    fired += 1;
                    match self.tick_once() {
                        Ok(handle) => {
                            debug!(
                                tick,
                                key_id = %handle.assignment().key_id,
                                "signing round scheduled"
                            );
                            if let Some(sink) = &self.handles {
                                // A closed receiver only means nobody is watching.
                                let _ = sink.send(handle);
                            }
                        },
                        Err(err) => error!(tick, error = %err, "failed to schedule signing round"),
                    }
                }
            }
        }

        fired
    }

    /// Runs the scheduler on a spawned task.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(token))
    }
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("identity", self.signer.identity())
            .field("tick", &self.rotation.tick())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use msgsign_keys::testutil::numbered_key_store;
    use msgsign_storage::testutil::seeded_store;

    use super::*;
    use crate::{config::SignerConfig, rotation::BatchAssignment};

    async fn scheduler(identity: &str, total: u64, keys: usize) -> PeriodicScheduler {
        let store = Arc::new(seeded_store(0).await);
        let config =
            SignerConfig::builder().worker_identity(identity).total_signers(total).build().unwrap();
        let keys = Arc::new(numbered_key_store(keys));
        let signer = BatchSigner::new(store, keys, config).await.unwrap();
        PeriodicScheduler::new(Arc::new(signer))
    }

    #[tokio::test]
    async fn test_tick_once_rotates_keys() {
        let mut scheduler = scheduler("signer-1", 2, 3).await;

        let assigned: Vec<BatchAssignment> =
            (0..3).map(|_| scheduler.tick_once().unwrap().assignment().clone()).collect();

        // replica 1 of 2 over 3 keys: (2t + 1) mod 3 = 1, 0, 2
        assert_eq!(
            assigned,
            vec![
                BatchAssignment::new("key-1", 1, 2),
                BatchAssignment::new("key-0", 1, 2),
                BatchAssignment::new("key-2", 1, 2),
            ]
        );
        assert_eq!(scheduler.rotation().tick(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let scheduler = scheduler("signer-0", 1, 1).await.with_interval(Duration::from_secs(3600));
        let token = CancellationToken::new();
        let task = scheduler.spawn(token.clone());

        token.cancel();
        let fired = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(fired, 0);
    }
}
