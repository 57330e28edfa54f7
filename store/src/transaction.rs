//! Transaction (data item) storage trait.

use crate::StoreError;
use whistle_types::{Timestamp, TransactionRecord, TxId};

pub trait TransactionStore {
    /// Insert a newly observed transaction; an existing row is left untouched.
    /// Returns whether a row was created.
    fn insert_transaction(&self, record: &TransactionRecord) -> Result<bool, StoreError>;

    /// Insert from a receipt, or overwrite only `deadline_height` if the row exists.
    fn upsert_receipt(&self, id: &TxId, deadline_height: u64, now: Timestamp) -> Result<(), StoreError>;

    fn get_transaction(&self, id: &TxId) -> Result<Option<TransactionRecord>, StoreError>;

    /// Mark verified items `Valid`, link them to `bundle`, and stamp
    /// `last_verified_at`. Returns the ids that were present in the store.
    fn link_valid_transactions(
        &self,
        ids: &[TxId],
        bundle: &TxId,
        now: Timestamp,
    ) -> Result<Vec<TxId>, StoreError>;

    /// Mark erroring items `Invalid` and link them to `bundle` without stamping
    /// `last_verified_at`. Rows already `Valid` are skipped. Returns the ids
    /// that were present in the store.
    fn link_invalid_transactions(&self, ids: &[TxId], bundle: &TxId) -> Result<Vec<TxId>, StoreError>;

    /// Escalate a transaction to `Invalid` and stamp `last_verified_at`, only
    /// if it is not `Valid` and has not been stamped before.
    /// Returns whether this call performed the transition.
    fn finalize_invalid_transaction(&self, id: &TxId, now: Timestamp) -> Result<bool, StoreError>;

    /// Set `bundled_in` only if it is unset. Returns whether it was set.
    fn set_transaction_parent(&self, id: &TxId, bundle: &TxId) -> Result<bool, StoreError>;

    /// Parentless, unescalated transactions with `deadline_height <= max_deadline`,
    /// ordered by deadline ascending.
    fn orphans_due(&self, max_deadline: u64) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Transactions past their deadline (`deadline_height < height`) that are
    /// not `Valid` and were never stamped, ordered by parent bundle.
    fn expired_unresolved(&self, height: u64) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Shared rule for [`TransactionStore::orphans_due`].
pub fn is_orphan_due(record: &TransactionRecord, max_deadline: u64) -> bool {
    record.bundled_in.is_none() && record.last_verified_at.is_none() && record.deadline_height <= max_deadline
}

/// Shared rule for [`TransactionStore::expired_unresolved`].
pub fn is_expired_unresolved(record: &TransactionRecord, height: u64) -> bool {
    !record.validity.is_valid() && record.last_verified_at.is_none() && record.deadline_height < height
}
