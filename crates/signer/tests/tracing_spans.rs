//! Integration test verifying that a signing round is traced as one
//! `signing_round` span enclosing the store operation spans.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use msgsign_keys::testutil::numbered_key_store;
use msgsign_signer::{BatchSigner, SignerConfig};
use msgsign_storage::testutil::seeded_store;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

/// Records `(span, parent)` name pairs as spans are created.
#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<(String, Option<String>)>>>,
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
            let parent = span.parent().map(|parent| parent.name().to_owned());
            self.spans.lock().expect("lock poisoned").push((span.name().to_owned(), parent));
        }
    }
}

#[tokio::test]
async fn signing_round_span_encloses_store_spans() {
    let store = Arc::new(seeded_store(3).await);
    let signer = Arc::new(
        BatchSigner::new(store, Arc::new(numbered_key_store(1)), SignerConfig::default())
            .await
            .expect("signer starts"),
    );

    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let outcome = signer
        .sign_batch(0, 1, "key-0")
        .expect("round spawned")
        .wait()
        .await
        .expect("round finished");
    assert!(outcome.is_committed());

    let recorded = spans.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|(name, _)| name == "signing_round"),
        "expected a 'signing_round' span, got: {recorded:?}"
    );
    for name in ["read_batch", "write_batch", "write_signing_key_metadata"] {
        assert!(
            recorded
                .iter()
                .any(|(span, parent)| span == name && parent.as_deref() == Some("signing_round")),
            "expected '{name}' inside 'signing_round', got: {recorded:?}"
        );
    }
}
