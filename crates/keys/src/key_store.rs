//! Key store capability.
//!
//! The signer never touches private key material directly. It asks a
//! [`KeyStore`] for the identifiers of the available keys and, per round, for
//! a [`MessageSigner`] capability bound to one key.
//!
//! # Usage
//!
//! ```
//! use msgsign_keys::{KeyStore, MemoryKeyStore, MessageSigner, SigningKey};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryKeyStore::new();
//! store.insert(SigningKey::generate().with_key_id("k2"));
//! store.insert(SigningKey::generate().with_key_id("k1"));
//!
//! assert_eq!(store.key_ids().await.unwrap(), vec!["k1", "k2"]);
//! let signer = store.get_key("k1").await.unwrap();
//! assert_eq!(signer.key_id(), "k1");
//! # });
//! ```

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::{KeyError, KeyResult},
    signing_key::SigningKey,
};

/// A capability that signs messages with one key.
pub trait MessageSigner: Send + Sync {
    /// Returns the identifier of the key.
    fn key_id(&self) -> &str;

    /// Signs `message`, returning the hex-encoded signature.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Signing`] if no signature could be produced.
    fn sign(&self, message: &str) -> KeyResult<String>;
}

/// Source of signing keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns the identifiers of every available key in ascending order.
    ///
    /// Replicas derive key rotation from positions in this list, so the order
    /// must be the same on every replica.
    async fn key_ids(&self) -> KeyResult<Vec<String>>;

    /// Returns the signing capability of `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NotFound`] if the key is unknown.
    async fn get_key(&self, key_id: &str) -> KeyResult<Arc<dyn MessageSigner>>;
}

/// In-memory implementation of [`KeyStore`].
///
/// Keys are kept in a [`BTreeMap`], so identifiers come back sorted. Clones
/// share the same keys.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    keys: Arc<RwLock<BTreeMap<String, Arc<dyn MessageSigner>>>>,
}

impl MemoryKeyStore {
    /// Creates an empty key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `count` freshly generated keys.
    #[must_use]
    pub fn generate(count: usize) -> Self {
        let store = Self::new();
        for _ in 0..count {
            store.insert(SigningKey::generate());
        }
        store
    }

    /// Adds `signer`, replacing any key with the same identifier.
    pub fn insert(&self, signer: impl MessageSigner + 'static) {
        self.insert_shared(Arc::new(signer));
    }

    /// Adds an already shared signer.
    pub fn insert_shared(&self, signer: Arc<dyn MessageSigner>) {
        let key_id = signer.key_id().to_owned();
        tracing::debug!(key_id = %key_id, "registered signing key");
        self.keys.write().insert(key_id, signer);
    }

    /// Removes the key `key_id`, returning whether it was present.
    pub fn remove(&self, key_id: &str) -> bool {
        self.keys.write().remove(key_id).is_some()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Returns `true` if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("key_ids", &self.keys.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn key_ids(&self) -> KeyResult<Vec<String>> {
        Ok(self.keys.read().keys().cloned().collect())
    }

    async fn get_key(&self, key_id: &str) -> KeyResult<Arc<dyn MessageSigner>> {
        self.keys.read().get(key_id).cloned().ok_or_else(|| KeyError::not_found(key_id))
    }
}
