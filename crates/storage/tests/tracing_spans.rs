//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on backend and message store operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use msgsign_storage::{
    MemoryBackend, Record, RecordStore, ShardSpec, StorageBackend, testutil::seeded_store,
};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are entered
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.set(b"key-1".to_vec(), b"value-1".to_vec()).await.expect("set should succeed");
    let _ = backend.get(b"key-1").await;
    let _ = backend.get_range(b"a".to_vec()..b"z".to_vec()).await;
    backend.delete(b"key-1").await.expect("delete should succeed");
    let _ = backend.transaction().await;

    for name in ["set", "get", "get_range", "delete", "transaction"] {
        assert_span(&spans, name);
    }
}

#[tokio::test]
async fn message_store_operations_create_spans() {
    let store = seeded_store(2).await;

    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let batch = store.read_batch(ShardSpec::new(0, 1).expect("valid shard")).await.expect("read");
    let signed: Vec<Record> = batch
        .into_iter()
        .map(|r| Record { signature: "00".into(), salt: "0".into(), key_id: "k1".into(), ..r })
        .collect();
    store.write_batch(&signed).await.expect("write batch");
    store.write_record(&signed[0]).await.expect("write record");
    let _ = store.read_signing_key_metadata("k1").await;

    for name in ["read_batch", "write_batch", "write_record", "read_signing_key_metadata"] {
        assert_span(&spans, name);
    }
}
