//! Per-key nonce allocation.
//!
//! Each signing key has a counter, persisted as [`SigningKeyMetadata`], that
//! starts at 0 on first use. A round loads the counter once, hands out its
//! current value as the salt of the next record, advances it only when that
//! record was signed, and persists the final value with a single upsert. The
//! salts of one round are therefore `[start, start + signed)` with no gaps.
//!
//! The read-modify-write is only safe against concurrent rounds on the same
//! key when it runs inside an atomic unit, where the competing upserts of the
//! metadata document conflict and one round is re-executed.

use msgsign_storage::{RecordStore, SigningKeyMetadata};
use tracing::debug;

use crate::error::SignerResult;

/// Nonce state of one key for the duration of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceAllocator {
    metadata: SigningKeyMetadata,
    start: u64,
}

impl NonceAllocator {
    /// Loads the counter of `key_id`, starting at 0 if the key was never used.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Storage`](crate::SignerError::Storage) if the metadata cannot be
    /// read.
    pub async fn load(store: &dyn RecordStore, key_id: &str) -> SignerResult<Self> {
        let metadata = store
            .read_signing_key_metadata(key_id)
            .await?
            .unwrap_or_else(|| SigningKeyMetadata::new(key_id));
        debug!(key_id, nonce = metadata.nonce, "loaded key nonce");
        Ok(Self::from_metadata(metadata))
    }

    /// Starts allocating from existing metadata.
    #[must_use]
    pub fn from_metadata(metadata: SigningKeyMetadata) -> Self {
        let start = metadata.nonce;
        Self { metadata, start }
    }

    /// Returns the key this counter belongs to.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.metadata.id
    }

    /// Returns the nonce the next record will be salted with.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.metadata.nonce
    }

    /// Returns the nonce the round started from.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns how many nonces this round has consumed.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.metadata.nonce - self.start
    }

    /// Returns the salt of the next record: the decimal form of [`current`](Self::current).
    #[must_use]
    pub fn salt(&self) -> String {
        self.metadata.nonce.to_string()
    }

    /// Consumes the current nonce. Call only after the record was signed.
    pub fn advance(&mut self) {
        self.metadata.nonce += 1;
    }

    /// Upserts the current counter.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Storage`](crate::SignerError::Storage) if the write fails.
    pub async fn persist(&self, store: &dyn RecordStore) -> SignerResult<()> {
        store.write_signing_key_metadata(&self.metadata).await?;
        debug!(
            key_id = %self.metadata.id,
            start = self.start,
            nonce = self.metadata.nonce,
            "persisted key nonce"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use msgsign_storage::{KvMessageStore, MemoryBackend};

    use super::*;

    #[tokio::test]
    async fn test_first_use_starts_at_zero() {
        let store = KvMessageStore::new(MemoryBackend::new());
        let nonce = NonceAllocator::load(&store, "k1").await.unwrap();
        assert_eq!(nonce.current(), 0);
        assert_eq!(nonce.salt(), "0");
        assert_eq!(nonce.key_id(), "k1");
    }

    #[tokio::test]
    async fn test_advance_and_persist_round_trip() {
        let store = KvMessageStore::new(MemoryBackend::new());
        let mut nonce = NonceAllocator::load(&store, "k1").await.unwrap();
        nonce.advance();
        nonce.advance();
        assert_eq!(nonce.allocated(), 2);
        nonce.persist(&store).await.unwrap();

        let reloaded = NonceAllocator::load(&store, "k1").await.unwrap();
        assert_eq!(reloaded.start(), 2);
        assert_eq!(reloaded.salt(), "2");
        assert_eq!(reloaded.allocated(), 0);
    }

    #[test]
    fn test_salts_are_decimal() {
        let metadata = SigningKeyMetadata { id: "k".into(), nonce: 9 };
        let mut nonce = NonceAllocator::from_metadata(metadata);
        assert_eq!(nonce.salt(), "9");
        nonce.advance();
        assert_eq!(nonce.salt(), "10");
    }
}
