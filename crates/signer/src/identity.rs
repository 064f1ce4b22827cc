//! Worker identity.
//!
//! Every replica is started with an identity string `<name>-<index>`, such as
//! the ordinal name of a stateful-set pod. The index is the last
//! `-`-separated component, so names may themselves contain dashes
//! (`msg-signer-2`). Together with the configured number of replicas it
//! determines which shard of the unsigned records this replica owns.

use msgsign_storage::ShardSpec;

use crate::error::{ConfigError, SignerError, SignerResult};

/// A replica's position among `total_shards` replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    name: String,
    shard: ShardSpec,
}

impl WorkerIdentity {
    /// Parses `identity` for a deployment of `total_shards` replicas.
    ///
    /// # Errors
    ///
    /// - [`SignerError::InvalidIdentity`] if `identity` is not `<name>-<index>` with a non-empty
    ///   name and a non-negative integer index
    /// - [`SignerError::Config`] if `total_shards` is zero
    /// - [`SignerError::ShardOutOfRange`] if `index >= total_shards`
    ///
    /// # Examples
    ///
    /// ```
    /// use msgsign_signer::WorkerIdentity;
    ///
    /// let identity = WorkerIdentity::parse("msg-signer-2", 3).unwrap();
    /// assert_eq!(identity.name(), "msg-signer");
    /// assert_eq!(identity.shard_index(), 2);
    ///
    /// assert!(WorkerIdentity::parse("signer-3", 3).is_err());
    /// assert!(WorkerIdentity::parse("signer", 3).is_err());
    /// ```
    pub fn parse(identity: &str, total_shards: u64) -> SignerResult<Self> {
        if total_shards == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "total_signers",
                min: "1".into(),
                value: "0".into(),
            }
            .into());
        }

        let (name, index) = identity.rsplit_once('-').ok_or_else(|| {
            SignerError::invalid_identity(identity, "expected <name>-<index>, e.g. signer-0")
        })?;
        if name.is_empty() {
            return Err(SignerError::invalid_identity(identity, "name must not be empty"));
        }
        let shard_index = Some(index)
            .filter(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|index| index.parse::<u64>().ok())
            .ok_or_else(|| {
                let reason = format!("index {index:?} is not an integer");
                SignerError::invalid_identity(identity, reason)
            })?;

        let shard = ShardSpec::new(shard_index, total_shards)
            .map_err(|_| SignerError::ShardOutOfRange { index: shard_index, count: total_shards })?;

        Ok(Self { name: name.to_owned(), shard })
    }

    /// Returns the name part of the identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns this replica's shard index.
    #[must_use]
    pub fn shard_index(&self) -> u64 {
        self.shard.index()
    }

    /// Returns the number of replicas.
    #[must_use]
    pub fn total_shards(&self) -> u64 {
        self.shard.count()
    }

    /// Returns the shard this replica owns.
    #[must_use]
    pub fn shard(&self) -> ShardSpec {
        self.shard
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{} ({})", self.name, self.shard.index(), self.shard)
    }
}
