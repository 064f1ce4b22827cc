//! Shared test utilities for signing tests.
//!
//! Feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! msgsign-keys = { path = "../keys", features = ["testutil"] }
//! ```

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{
    error::{KeyError, KeyResult},
    key_store::{MemoryKeyStore, MessageSigner},
    signing_key::SigningKey,
};

/// Creates a store with keys `key-0 .. key-{count-1}`.
///
/// Identifiers sort in numeric order for `count <= 10`.
#[must_use]
pub fn numbered_key_store(count: usize) -> MemoryKeyStore {
    let store = MemoryKeyStore::new();
    for i in 0..count {
        store.insert(SigningKey::generate().with_key_id(format!("key-{i}")));
    }
    store
}

/// A signer that fails for selected messages.
///
/// A signing request fails when the message ends with one of the registered
/// suffixes. Since rounds sign `salt + message`, registering a record's message
/// makes exactly that record fail regardless of its salt.
#[derive(Clone)]
pub struct FlakySigner {
    key: SigningKey,
    failing_suffixes: Arc<RwLock<HashSet<String>>>,
    calls: Arc<AtomicUsize>,
}

impl FlakySigner {
    /// Wraps `key`; nothing fails until [`fail_on`](Self::fail_on) is called.
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            failing_suffixes: Arc::new(RwLock::new(HashSet::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes signing fail for messages ending with `suffix`.
    #[must_use]
    pub fn fail_on(self, suffix: impl Into<String>) -> Self {
        self.failing_suffixes.write().insert(suffix.into());
        self
    }

    /// Returns the wrapped key, for verifying produced signatures.
    #[must_use]
    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Returns how many signing requests were made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MessageSigner for FlakySigner {
    fn key_id(&self) -> &str {
        self.key.key_id()
    }

    fn sign(&self, message: &str) -> KeyResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_suffixes.read().iter().any(|suffix| message.ends_with(suffix.as_str())) {
            return Err(KeyError::Signing(format!("injected signing failure for {message:?}")));
        }
        Ok(self.key.sign(message))
    }
}
