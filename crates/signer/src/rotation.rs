//! Key rotation and batch assignments.
//!
//! Replica `r` of `n` uses key `keys[(t * n + r) mod len(keys)]` on logical
//! tick `t`. With at least `n` keys, replicas that tick in lockstep never pick
//! the same key on the same tick, and over time every replica walks the whole
//! key list. Rotation state lives in the [`KeyRotation`] value owned by the
//! scheduler; there is no process-wide counter.

use crate::{
    error::{SignerError, SignerResult},
    identity::WorkerIdentity,
};

/// One signing round to run: the shard to read and the key to sign with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchAssignment {
    /// Key to sign with.
    pub key_id: String,
    /// Shard of the unsigned partition to read.
    pub shard_index: u64,
    /// Number of shards the unsigned partition is split into.
    pub shard_count: u64,
}

impl BatchAssignment {
    /// Creates an assignment.
    pub fn new(key_id: impl Into<String>, shard_index: u64, shard_count: u64) -> Self {
        Self { key_id: key_id.into(), shard_index, shard_count }
    }
}

/// Per-replica rotation state.
#[derive(Debug, Clone)]
pub struct KeyRotation {
    key_ids: Vec<String>,
    shard_index: u64,
    total_shards: u64,
    tick: u64,
}

impl KeyRotation {
    /// Creates the rotation of `identity` over `key_ids`, starting at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::InsufficientKeys`] if `key_ids` is empty.
    pub fn new(key_ids: Vec<String>, identity: &WorkerIdentity) -> SignerResult<Self> {
        if key_ids.is_empty() {
            return Err(SignerError::InsufficientKeys {
                available: 0,
                required: identity.total_shards(),
            });
        }
        Ok(Self {
            key_ids,
            shard_index: identity.shard_index(),
            total_shards: identity.total_shards(),
            tick: 0,
        })
    }

    /// Starts at `tick` instead of 0.
    #[must_use]
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// Returns the key used on `tick`.
    #[must_use]
    pub fn key_for_tick(&self, tick: u64) -> &str {
        let len = self.key_ids.len() as u128;
        let slot = (u128::from(tick) * u128::from(self.total_shards) + u128::from(self.shard_index))
            % len;
        // slot < len, which came from a usize
        &self.key_ids[slot as usize]
    }

    /// Returns the assignment for the current tick and moves to the next one.
    pub fn next_assignment(&mut self) -> BatchAssignment {
        let assignment = BatchAssignment::new(
            self.key_for_tick(self.tick),
            self.shard_index,
            self.total_shards,
        );
        self.tick = self.tick.wrapping_add(1);
        assignment
    }

    /// Returns the next tick to be assigned.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Returns the rotated key list.
    #[must_use]
    pub fn key_ids(&self) -> &[String] {
        &self.key_ids
    }
}

/// Plans a fan-out over `record_count` unsigned records.
///
/// Splits the records into `ceil(record_count / batch_size)` shards and assigns
/// shard `i` to key `key_ids[i mod len]`. Returns no assignments if there is
/// nothing to sign, no key, or a zero batch size.
///
/// # Examples
///
/// ```
/// use msgsign_signer::plan_assignments;
///
/// let keys = vec!["a".to_owned(), "b".to_owned()];
/// let plan = plan_assignments(250, 100, &keys);
/// assert_eq!(plan.len(), 3);
/// assert_eq!(plan[2].key_id, "a");
/// assert_eq!(plan[2].shard_count, 3);
/// ```
#[must_use]
pub fn plan_assignments(
    record_count: usize,
    batch_size: usize,
    key_ids: &[String],
) -> Vec<BatchAssignment> {
    if record_count == 0 || batch_size == 0 || key_ids.is_empty() {
        return Vec::new();
    }
    let batches = record_count.div_ceil(batch_size);
    (0..batches)
        .map(|i| BatchAssignment::new(&key_ids[i % key_ids.len()], i as u64, batches as u64))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("k{i}")).collect()
    }

    fn rotation(identity: &str, total: u64, key_count: usize) -> KeyRotation {
        KeyRotation::new(keys(key_count), &WorkerIdentity::parse(identity, total).unwrap()).unwrap()
    }

    #[test]
    fn test_rotation_formula() {
        // 3 replicas, 4 keys: replica 1 uses (3t + 1) mod 4 = 1, 0, 3, 2, 1, ...
        let mut rotation = rotation("signer-1", 3, 4);
        let used: Vec<_> = (0..5).map(|_| rotation.next_assignment().key_id).collect();
        assert_eq!(used, ["k1", "k0", "k3", "k2", "k1"]);
        assert_eq!(rotation.tick(), 5);
    }

    #[test]
    fn test_assignment_carries_identity_shard() {
        let mut rotation = rotation("signer-2", 3, 3);
        let assignment = rotation.next_assignment();
        assert_eq!(assignment, BatchAssignment::new("k2", 2, 3));
    }

    #[test]
    fn test_large_tick_does_not_overflow() {
        let rotation = rotation("signer-1", 3, 5);
        let expected = ((u128::from(u64::MAX) * 3 + 1) % 5) as usize;
        assert_eq!(rotation.key_for_tick(u64::MAX), format!("k{expected}"));
    }

    #[test]
    fn test_empty_key_list_rejected() {
        let identity = WorkerIdentity::parse("signer-0", 2).unwrap();
        let err = KeyRotation::new(Vec::new(), &identity).unwrap_err();
        assert!(matches!(err, SignerError::InsufficientKeys { available: 0, required: 2 }));
    }

    #[test]
    fn test_plan_assignments() {
        let plan = plan_assignments(5, 2, &keys(2));
        assert_eq!(
            plan,
            vec![
                BatchAssignment::new("k0", 0, 3),
                BatchAssignment::new("k1", 1, 3),
                BatchAssignment::new("k0", 2, 3),
            ]
        );
        assert!(plan_assignments(0, 10, &keys(2)).is_empty());
        assert!(plan_assignments(10, 10, &[]).is_empty());
        assert_eq!(plan_assignments(10, 10, &keys(1)).len(), 1);
    }

    proptest! {
        /// Replicas ticking in lockstep never share a key when keys >= replicas.
        #[test]
        fn prop_lockstep_replicas_use_distinct_keys(
            total in 1u64..8,
            extra_keys in 0usize..8,
            tick in 0u64..10_000,
        ) {
            let key_count = total as usize + extra_keys;
            let used: HashSet<String> = (0..total)
                .map(|r| {
                    rotation(&format!("signer-{r}"), total, key_count).key_for_tick(tick).to_owned()
                })
                .collect();
            prop_assert_eq!(used.len(), total as usize);
        }
    }
}
