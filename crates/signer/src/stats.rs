//! Signing progress statistics.

use msgsign_storage::{Partition, RecordStore};
use serde::{Deserialize, Serialize};

use crate::error::SignerResult;

/// Number of records in each partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerStats {
    /// Records in the signed partition.
    #[serde(rename = "signedRecords")]
    pub signed_records: usize,
    /// Records in the unsigned partition.
    #[serde(rename = "unsignedRecords")]
    pub unsigned_records: usize,
}

/// Counts both partitions of `store`.
///
/// The two counts are separate queries, so a round committing in between may
/// make them sum to more or less than the number of distinct records.
///
/// # Errors
///
/// Returns [`SignerError::Storage`](crate::SignerError::Storage) if either count fails.
pub async fn get_stats(store: &dyn RecordStore) -> SignerResult<SignerStats> {
    let signed_records = store.record_count(Partition::Signed).await?;
    let unsigned_records = store.record_count(Partition::Unsigned).await?;
    Ok(SignerStats { signed_records, unsigned_records })
}
