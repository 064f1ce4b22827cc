//! Coordination-free record sharding.
//!
//! Replicas split the unsigned partition without talking to each other: the
//! shard of a record is a pure function of its identifier. The identifier is
//! hex-decoded, its first 8 bytes are read as a little-endian `u64`, and the
//! record belongs to shard `value % shard_count`. Any number of replicas that
//! agree on `shard_count` therefore compute disjoint partitions whose union is
//! the whole unsigned set.
//!
//! Every selection rescans the full candidate set, and shards are balanced
//! only when identifiers are uniformly distributed. Neither is corrected here.

use tracing::warn;

use crate::types::Record;

/// Number of identifier bytes that determine a record's shard.
pub const SHARD_KEY_BYTES: usize = 8;

/// One replica's slice of the record space: shard `index` out of `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardSpec {
    index: u64,
    count: u64,
}

/// Reasons a shard specification or identifier is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShardError {
    /// `count` was zero.
    #[error("shard count must be at least 1")]
    ZeroShards,

    /// `index` was not below `count`.
    #[error("shard index {index} is out of range for {count} shards")]
    IndexOutOfRange {
        /// Requested shard index.
        index: u64,
        /// Total number of shards.
        count: u64,
    },

    /// The identifier is not valid hex.
    #[error("record id {id:?} is not valid hex")]
    InvalidHex {
        /// The offending identifier.
        id: String,
    },

    /// The identifier decodes to fewer than [`SHARD_KEY_BYTES`] bytes.
    #[error("record id {id:?} decodes to {len} bytes, need at least 8")]
    TooShort {
        /// The offending identifier.
        id: String,
        /// Number of decoded bytes.
        len: usize,
    },
}

impl ShardSpec {
    /// Creates a shard specification, validating `index < count`.
    ///
    /// # Errors
    ///
    /// Returns [`ShardError`] if `count` is zero or `index >= count`.
    pub fn new(index: u64, count: u64) -> Result<Self, ShardError> {
        if count == 0 {
            return Err(ShardError::ZeroShards);
        }
        if index >= count {
            return Err(ShardError::IndexOutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    /// Returns the shard index.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the total number of shards.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` if the record with identifier `id` belongs to this shard.
    ///
    /// # Errors
    ///
    /// Returns [`ShardError`] if `id` cannot be decoded into a shard key.
    pub fn contains(&self, id: &str) -> Result<bool, ShardError> {
        Ok(shard_key(id)? % self.count == self.index)
    }
}

impl std::fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

/// Decodes the shard key of a hex identifier.
///
/// # Errors
///
/// Returns [`ShardError::InvalidHex`] or [`ShardError::TooShort`].
///
/// # Examples
///
/// ```
/// use msgsign_storage::shard::shard_key;
///
/// assert_eq!(shard_key("0300000000000000").unwrap(), 3);
/// assert_eq!(shard_key("0100000000000000ffff").unwrap(), 1);
/// assert!(shard_key("0102").is_err());
/// ```
pub fn shard_key(id: &str) -> Result<u64, ShardError> {
    let bytes = hex::decode(id).map_err(|_| ShardError::InvalidHex { id: id.to_owned() })?;
    let head: [u8; SHARD_KEY_BYTES] = bytes
        .get(..SHARD_KEY_BYTES)
        .and_then(|head| head.try_into().ok())
        .ok_or_else(|| ShardError::TooShort { id: id.to_owned(), len: bytes.len() })?;
    Ok(u64::from_le_bytes(head))
}

/// Keeps the records that belong to `shard`, preserving input order.
///
/// Records whose identifier cannot be decoded are skipped with a warning.
pub fn select_shard<I>(records: I, shard: ShardSpec) -> Vec<Record>
where
    I: IntoIterator<Item = Record>,
{
    records
        .into_iter()
        .filter(|record| match shard.contains(&record.id) {
            Ok(member) => member,
            Err(err) => {
                warn!(record_id = %record.id, error = %err, "skipping record with unusable id");
                false
            },
        })
        .collect()
}
