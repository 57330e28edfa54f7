//! Bundle storage trait.

use crate::StoreError;
use whistle_types::{BundleRecord, Timestamp, TxId, Validity};

pub trait BundleStore {
    /// Insert-or-ignore by id. Returns whether a row was created.
    fn insert_bundle(&self, record: &BundleRecord) -> Result<bool, StoreError>;

    fn get_bundle(&self, id: &TxId) -> Result<Option<BundleRecord>, StoreError>;

    /// Start a verification attempt: for an `Unknown` bundle, increment
    /// `verify_attempts` and set `last_attempt_at` in one write. A decided
    /// bundle is returned unchanged. `None` if the bundle is unknown.
    fn begin_verify_attempt(&self, id: &TxId, now: Timestamp) -> Result<Option<BundleRecord>, StoreError>;

    /// Set a terminal validity and `last_verified_at`, only if the bundle is
    /// still `Unknown`. Returns whether this call performed the transition.
    fn finalize_bundle(&self, id: &TxId, validity: Validity, now: Timestamp) -> Result<bool, StoreError>;

    /// `Unknown` bundles with `block <= max_block` whose last attempt is unset
    /// or at/before `retry_cutoff`, ordered by block ascending, at most `limit`.
    fn bundles_due_for_verification(
        &self,
        max_block: u64,
        retry_cutoff: Timestamp,
        limit: usize,
    ) -> Result<Vec<BundleRecord>, StoreError>;

    /// Highest `block` among bundles posted by `node`.
    fn latest_block_for_node(&self, node: &str) -> Result<Option<u64>, StoreError>;
}

/// Shared eligibility rule for [`BundleStore::bundles_due_for_verification`].
pub fn is_due(record: &BundleRecord, max_block: u64, retry_cutoff: Timestamp) -> bool {
    record.validity == Validity::Unknown
        && record.block <= max_block
        && record.last_attempt_at.map_or(true, |t| t <= retry_cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(block: u64, last_attempt: Option<u64>) -> BundleRecord {
        let mut b = BundleRecord::discovered(TxId::new([1; 32]), block, None, Timestamp::new(0));
        b.last_attempt_at = last_attempt.map(Timestamp::new);
        b
    }

    #[test]
    fn due_respects_block_and_interval() {
        let cutoff = Timestamp::new(1_000);
        assert!(is_due(&bundle(100, None), 100, cutoff));
        assert!(!is_due(&bundle(101, None), 100, cutoff));
        assert!(is_due(&bundle(100, Some(1_000)), 100, cutoff));
        assert!(!is_due(&bundle(100, Some(1_001)), 100, cutoff));
    }

    #[test]
    fn decided_bundles_are_never_due() {
        let mut b = bundle(1, None);
        b.validity = Validity::Invalid;
        assert!(!is_due(&b, 100, Timestamp::new(0)));
    }
}
