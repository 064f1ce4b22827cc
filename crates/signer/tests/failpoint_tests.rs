#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Signing rounds under injected faults.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p msgsign-signer --features failpoints --test failpoint_tests
//! ```

use std::{sync::Arc, time::Duration};

use msgsign_keys::testutil::numbered_key_store;
use msgsign_signer::{BatchSigner, RoundOutcome, SignerConfig, SignerError, SignerState};
use msgsign_storage::{
    KvMessageStore, MemoryBackend, Partition, RecordStore,
    testutil::{FailingBackend, seed, seeded_store},
};

fn config(transactional: bool) -> SignerConfig {
    SignerConfig::builder().transactional(transactional).build().unwrap()
}

#[tokio::test]
async fn crash_between_insert_and_delete_rolls_back_transactional_round() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("write-batch-after-insert", "return").expect("failed to configure fail point");

    let store = Arc::new(seeded_store(4).await);
    let keys = Arc::new(numbered_key_store(1));
    let signer = Arc::new(BatchSigner::new(store.clone(), keys, config(true)).await.unwrap());

    let outcome = signer.sign_batch(0, 1, "key-0").unwrap().wait().await.unwrap();

    assert!(matches!(outcome, RoundOutcome::Aborted(SignerError::Storage(_))), "{outcome:?}");
    assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 0);
    assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 4);
    assert!(store.read_signing_key_metadata("key-0").await.unwrap().is_none());

    scenario.teardown();
}

#[tokio::test]
async fn crash_between_insert_and_delete_recovered_by_direct_fallback() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("write-batch-after-insert", "return").expect("failed to configure fail point");

    let store = Arc::new(seeded_store(4).await);
    let keys = Arc::new(numbered_key_store(1));
    let signer = Arc::new(BatchSigner::new(store.clone(), keys, config(false)).await.unwrap());

    let outcome = signer.sign_batch(0, 1, "key-0").unwrap().wait().await.unwrap();

    // Individual writes do not pass the bulk fail point, so every record lands.
    let report = outcome.report().expect("round not aborted");
    assert!(outcome.is_committed());
    assert!(report.fallback);
    assert_eq!((report.written, report.write_failures), (4, 0));
    assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 4);
    assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 0);

    scenario.teardown();
}

#[tokio::test]
async fn panicking_round_surfaces_as_round_failure() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("unit-retry-before-sleep", "panic").expect("failed to configure fail point");

    let backend = FailingBackend::new(MemoryBackend::new());
    backend.conflict_next_commits(1);
    let store = Arc::new(KvMessageStore::new(backend.clone()));
    seed(&*store, 0..2).await;
    let signer = Arc::new(
        BatchSigner::new(store.clone(), Arc::new(numbered_key_store(1)), config(true))
            .await
            .unwrap(),
    );

    let result = signer.sign_batch(0, 1, "key-0").unwrap().wait().await;

    assert!(matches!(result, Err(SignerError::RoundFailed { .. })), "{result:?}");
    assert_eq!(signer.state(), SignerState::Idle);
    assert_eq!(store.record_count(Partition::Unsigned).await.unwrap(), 2);

    scenario.teardown();
}

#[tokio::test]
async fn retry_sleep_delay_does_not_change_outcome() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("unit-retry-before-sleep", "sleep(20)").expect("failed to configure fail point");

    let backend = FailingBackend::new(MemoryBackend::new());
    backend.conflict_next_commits(2);
    let store = Arc::new(KvMessageStore::new(backend.clone()));
    seed(&*store, 0..3).await;
    let signer = Arc::new(
        BatchSigner::new(store.clone(), Arc::new(numbered_key_store(1)), config(true))
            .await
            .unwrap(),
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        signer.sign_batch(0, 1, "key-0").unwrap().wait(),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(outcome.is_committed());
    assert_eq!(backend.commit_attempts(), 3);
    assert_eq!(signer.metrics().snapshot().unit_retries, 2);
    assert_eq!(store.record_count(Partition::Signed).await.unwrap(), 3);

    scenario.teardown();
}
