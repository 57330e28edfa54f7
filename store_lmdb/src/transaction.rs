//! LMDB implementation of TransactionStore.

use heed::{RoTxn, RwTxn};

use whistle_store::transaction::{is_expired_unresolved, is_orphan_due, TransactionStore};
use whistle_store::StoreError;
use whistle_types::{Timestamp, TransactionRecord, TxId, Validity};

use crate::environment::{decode, encode};
use crate::{LmdbEnvironment, LmdbError};

/// Index key: deadline (big-endian, so LMDB orders by height) then id.
fn deadline_key(deadline: u64, id: &TxId) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&deadline.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn split_deadline_key(key: &[u8]) -> Result<(u64, TxId), LmdbError> {
    if key.len() != 40 {
        return Err(LmdbError::Corrupt(format!("deadline index key of {} bytes", key.len())));
    }
    let mut deadline = [0u8; 8];
    deadline.copy_from_slice(&key[..8]);
    let id = TxId::from_slice(&key[8..]).map_err(|e| LmdbError::Corrupt(e.to_string()))?;
    Ok((u64::from_be_bytes(deadline), id))
}

impl LmdbEnvironment {
    fn read_tx(&self, rtxn: &RoTxn, id: &TxId) -> Result<Option<TransactionRecord>, LmdbError> {
        match self.transactions_db.get(rtxn, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn write_tx(&self, wtxn: &mut RwTxn, record: &TransactionRecord) -> Result<(), LmdbError> {
        self.transactions_db
            .put(wtxn, record.id.as_bytes(), &encode(record)?)?;
        Ok(())
    }

    fn insert_tx_row(&self, wtxn: &mut RwTxn, record: &TransactionRecord) -> Result<(), LmdbError> {
        self.write_tx(wtxn, record)?;
        self.tx_by_deadline_db
            .put(wtxn, &deadline_key(record.deadline_height, &record.id), &[])?;
        Ok(())
    }

    /// Walk the deadline index in ascending order while `keep(deadline)` holds.
    fn scan_by_deadline(
        &self,
        keep: impl Fn(u64) -> bool,
        filter: impl Fn(&TransactionRecord) -> bool,
    ) -> Result<Vec<TransactionRecord>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for entry in self.tx_by_deadline_db.iter(&rtxn)? {
            let (key, _) = entry?;
            let (deadline, id) = split_deadline_key(key)?;
            if !keep(deadline) {
                break;
            }
            if let Some(record) = self.read_tx(&rtxn, &id)? {
                if filter(&record) {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }
}

impl TransactionStore for LmdbEnvironment {
    fn insert_transaction(&self, record: &TransactionRecord) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.read_tx(&wtxn, &record.id)?.is_some() {
            return Ok(false);
        }
        self.insert_tx_row(&mut wtxn, record)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn upsert_receipt(&self, id: &TxId, deadline_height: u64, now: Timestamp) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        match self.read_tx(&wtxn, id)? {
            Some(mut existing) => {
                if existing.deadline_height != deadline_height {
                    self.tx_by_deadline_db
                        .delete(&mut wtxn, &deadline_key(existing.deadline_height, id))
                        .map_err(LmdbError::from)?;
                    existing.deadline_height = deadline_height;
                    self.insert_tx_row(&mut wtxn, &existing)?;
                }
            }
            None => {
                let record = TransactionRecord::observed(*id, deadline_height, now);
                self.insert_tx_row(&mut wtxn, &record)?;
            }
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_transaction(&self, id: &TxId) -> Result<Option<TransactionRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.read_tx(&rtxn, id)?)
    }

    fn link_valid_transactions(
        &self,
        ids: &[TxId],
        bundle: &TxId,
        now: Timestamp,
    ) -> Result<Vec<TxId>, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut present = Vec::new();
        for id in ids {
            let Some(mut record) = self.read_tx(&wtxn, id)? else {
                continue;
            };
            record.validity = Validity::Valid;
            record.bundled_in = Some(*bundle);
            record.last_verified_at = Some(now);
            self.write_tx(&mut wtxn, &record)?;
            present.push(*id);
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(present)
    }

    fn link_invalid_transactions(&self, ids: &[TxId], bundle: &TxId) -> Result<Vec<TxId>, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut present = Vec::new();
        for id in ids {
            let Some(mut record) = self.read_tx(&wtxn, id)? else {
                continue;
            };
            present.push(*id);
            if record.validity.is_valid() {
                continue;
            }
            record.validity = Validity::Invalid;
            record.bundled_in = Some(*bundle);
            self.write_tx(&mut wtxn, &record)?;
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(present)
    }

    fn finalize_invalid_transaction(&self, id: &TxId, now: Timestamp) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let Some(mut record) = self.read_tx(&wtxn, id)? else {
            return Ok(false);
        };
        if record.validity.is_valid() || record.last_verified_at.is_some() {
            return Ok(false);
        }
        record.validity = Validity::Invalid;
        record.last_verified_at = Some(now);
        self.write_tx(&mut wtxn, &record)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn set_transaction_parent(&self, id: &TxId, bundle: &TxId) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let Some(mut record) = self.read_tx(&wtxn, id)? else {
            return Ok(false);
        };
        if record.bundled_in.is_some() {
            return Ok(false);
        }
        record.bundled_in = Some(*bundle);
        self.write_tx(&mut wtxn, &record)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn orphans_due(&self, max_deadline: u64) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.scan_by_deadline(|d| d <= max_deadline, |r| is_orphan_due(r, max_deadline))?)
    }

    fn expired_unresolved(&self, height: u64) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut out = self.scan_by_deadline(|d| d < height, |r| is_expired_unresolved(r, height))?;
        out.sort_by_key(|r| r.bundled_in);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 16 * 1024 * 1024).unwrap();
        (dir, env)
    }

    fn id(n: u8) -> TxId {
        TxId::new([n; 32])
    }

    #[test]
    fn insert_is_idempotent() {
        let (_dir, store) = open();
        let rec = TransactionRecord::observed(id(1), 500, Timestamp::new(1));
        assert!(store.insert_transaction(&rec).unwrap());
        let mut again = rec.clone();
        again.deadline_height = 999;
        assert!(!store.insert_transaction(&again).unwrap());
        assert_eq!(store.get_transaction(&id(1)).unwrap().unwrap().deadline_height, 500);
    }

    #[test]
    fn receipt_merges_deadline_and_reindexes() {
        let (_dir, store) = open();
        store
            .insert_transaction(&TransactionRecord::observed(id(1), 500, Timestamp::new(1)))
            .unwrap();
        store.upsert_receipt(&id(1), 120, Timestamp::new(2)).unwrap();
        store.upsert_receipt(&id(2), 130, Timestamp::new(2)).unwrap();

        let rec = store.get_transaction(&id(1)).unwrap().unwrap();
        assert_eq!(rec.deadline_height, 120);
        assert_eq!(rec.created_at, Timestamp::new(1));

        let due: Vec<_> = store.orphans_due(125).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(due, vec![id(1)]);
        assert_eq!(store.orphans_due(10_000).unwrap().len(), 2);
    }

    #[test]
    fn link_valid_reports_present_ids() {
        let (_dir, store) = open();
        store
            .insert_transaction(&TransactionRecord::observed(id(1), 10, Timestamp::new(1)))
            .unwrap();
        let present = store
            .link_valid_transactions(&[id(1), id(2)], &id(9), Timestamp::new(5))
            .unwrap();
        assert_eq!(present, vec![id(1)]);
        let rec = store.get_transaction(&id(1)).unwrap().unwrap();
        assert_eq!(rec.validity, Validity::Valid);
        assert_eq!(rec.bundled_in, Some(id(9)));
        assert_eq!(rec.last_verified_at, Some(Timestamp::new(5)));
    }

    #[test]
    fn link_invalid_never_downgrades_valid() {
        let (_dir, store) = open();
        for n in [1, 2] {
            store
                .insert_transaction(&TransactionRecord::observed(id(n), 10, Timestamp::new(1)))
                .unwrap();
        }
        store
            .link_valid_transactions(&[id(1)], &id(8), Timestamp::new(2))
            .unwrap();
        store.link_invalid_transactions(&[id(1), id(2)], &id(9)).unwrap();

        let one = store.get_transaction(&id(1)).unwrap().unwrap();
        assert_eq!(one.validity, Validity::Valid);
        assert_eq!(one.bundled_in, Some(id(8)));
        let two = store.get_transaction(&id(2)).unwrap().unwrap();
        assert_eq!(two.validity, Validity::Invalid);
        assert_eq!(two.bundled_in, Some(id(9)));
        assert!(two.last_verified_at.is_none());
    }

    #[test]
    fn finalize_invalid_only_once() {
        let (_dir, store) = open();
        store
            .insert_transaction(&TransactionRecord::observed(id(1), 10, Timestamp::new(1)))
            .unwrap();
        assert!(store.finalize_invalid_transaction(&id(1), Timestamp::new(3)).unwrap());
        assert!(!store.finalize_invalid_transaction(&id(1), Timestamp::new(4)).unwrap());
        assert!(!store.finalize_invalid_transaction(&id(7), Timestamp::new(4)).unwrap());
    }

    #[test]
    fn parent_set_only_when_unset() {
        let (_dir, store) = open();
        store
            .insert_transaction(&TransactionRecord::observed(id(1), 10, Timestamp::new(1)))
            .unwrap();
        assert!(store.set_transaction_parent(&id(1), &id(5)).unwrap());
        assert!(!store.set_transaction_parent(&id(1), &id(6)).unwrap());
        assert_eq!(store.get_transaction(&id(1)).unwrap().unwrap().bundled_in, Some(id(5)));
    }

    #[test]
    fn expired_unresolved_excludes_valid_and_stamped() {
        let (_dir, store) = open();
        for (n, deadline) in [(1, 50), (2, 60), (3, 70), (4, 200)] {
            store
                .insert_transaction(&TransactionRecord::observed(id(n), deadline, Timestamp::new(1)))
                .unwrap();
        }
        store
            .link_valid_transactions(&[id(2)], &id(9), Timestamp::new(2))
            .unwrap();
        store.finalize_invalid_transaction(&id(3), Timestamp::new(2)).unwrap();

        let due: Vec<_> = store.expired_unresolved(100).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(due, vec![id(1)]);
    }
}
