//! Common types used across storage operations.
//!
//! This module defines the raw key-value pair returned by backends and the
//! documents the message store persists on top of them: [`Record`] and
//! [`SigningKeyMetadata`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Key-value pair returned from range queries.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use msgsign_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("records/unsigned/0a"), Bytes::from("{}"));
/// assert_eq!(kv.key, Bytes::from("records/unsigned/0a"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// The two record partitions of the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Records waiting to be signed.
    Unsigned,
    /// Records that carry a signature, salt and key id.
    Signed,
}

impl Partition {
    /// Returns the partition for the `signed` flag used by count queries.
    #[must_use]
    pub fn from_signed(signed: bool) -> Self {
        if signed { Self::Signed } else { Self::Unsigned }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsigned => f.write_str("unsigned"),
            Self::Signed => f.write_str("signed"),
        }
    }
}

/// A message to sign, and once signed, its signature.
///
/// Unsigned records only carry `id` and `msg`; the signing round fills in
/// `signature`, `salt` and `key_id` and moves the record to the signed
/// partition. Persisted field names are `id`, `msg`, `sign`, `key`, `salt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Hex-encoded unique identifier.
    pub id: String,

    /// Message payload.
    pub msg: String,

    /// Hex-encoded signature over `salt + msg`.
    #[serde(rename = "sign", default)]
    pub signature: String,

    /// Decimal nonce the record was salted with.
    #[serde(default)]
    pub salt: String,

    /// Identifier of the key that produced `signature`.
    #[serde(rename = "key", default)]
    pub key_id: String,
}

impl Record {
    /// Creates an unsigned record.
    pub fn unsigned(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg: msg.into(),
            signature: String::new(),
            salt: String::new(),
            key_id: String::new(),
        }
    }

    /// Returns `true` once a signature has been attached.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

/// Per-key nonce state.
///
/// One document per signing key; `nonce` is the next salt to hand out and
/// starts at 0 on first use of the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyMetadata {
    /// Signing key identifier.
    pub id: String,

    /// Next unused nonce.
    pub nonce: u64,
}

impl SigningKeyMetadata {
    /// Creates metadata for a key that has never been used.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), nonce: 0 }
    }
}
