//! LMDB implementation of BundleStore.

use heed::{RoTxn, RwTxn};

use whistle_store::bundle::{is_due, BundleStore};
use whistle_store::StoreError;
use whistle_types::{BundleRecord, Timestamp, TxId, Validity};

use crate::environment::{decode, encode};
use crate::{LmdbEnvironment, LmdbError};

impl LmdbEnvironment {
    fn read_bundle(&self, rtxn: &RoTxn, id: &TxId) -> Result<Option<BundleRecord>, LmdbError> {
        match self.bundles_db.get(rtxn, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn write_bundle(&self, wtxn: &mut RwTxn, record: &BundleRecord) -> Result<(), LmdbError> {
        self.bundles_db.put(wtxn, record.id.as_bytes(), &encode(record)?)?;
        Ok(())
    }

    fn all_bundles(&self) -> Result<Vec<BundleRecord>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for entry in self.bundles_db.iter(&rtxn)? {
            let (_, value) = entry?;
            out.push(decode(value)?);
        }
        Ok(out)
    }
}

impl BundleStore for LmdbEnvironment {
    fn insert_bundle(&self, record: &BundleRecord) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.read_bundle(&wtxn, &record.id)?.is_some() {
            return Ok(false);
        }
        self.write_bundle(&mut wtxn, record)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn get_bundle(&self, id: &TxId) -> Result<Option<BundleRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.read_bundle(&rtxn, id)?)
    }

    fn begin_verify_attempt(&self, id: &TxId, now: Timestamp) -> Result<Option<BundleRecord>, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let Some(mut record) = self.read_bundle(&wtxn, id)? else {
            return Ok(None);
        };
        if record.validity.is_decided() {
            return Ok(Some(record));
        }
        record.verify_attempts = record.verify_attempts.saturating_add(1);
        record.last_attempt_at = Some(now);
        self.write_bundle(&mut wtxn, &record)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Some(record))
    }

    fn finalize_bundle(&self, id: &TxId, validity: Validity, now: Timestamp) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let Some(mut record) = self.read_bundle(&wtxn, id)? else {
            return Ok(false);
        };
        if record.validity.is_decided() {
            return Ok(false);
        }
        record.validity = validity;
        record.last_verified_at = Some(now);
        self.write_bundle(&mut wtxn, &record)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn bundles_due_for_verification(
        &self,
        max_block: u64,
        retry_cutoff: Timestamp,
        limit: usize,
    ) -> Result<Vec<BundleRecord>, StoreError> {
        let mut due: Vec<_> = self
            .all_bundles()?
            .into_iter()
            .filter(|b| is_due(b, max_block, retry_cutoff))
            .collect();
        due.sort_by_key(|b| b.block);
        due.truncate(limit);
        Ok(due)
    }

    fn latest_block_for_node(&self, node: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .all_bundles()?
            .into_iter()
            .filter(|b| b.from_node.as_deref() == Some(node))
            .map(|b| b.block)
            .max())
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

    fn bundle(n: u8, block: u64, node: Option<&str>) -> BundleRecord {
        BundleRecord::discovered(TxId::new([n; 32]), block, node.map(String::from), Timestamp::new(1))
    }

    #[test]
    fn insert_or_ignore() {
        let (_dir, store) = open();
        assert!(store.insert_bundle(&bundle(1, 10, None)).unwrap());
        assert!(!store.insert_bundle(&bundle(1, 99, None)).unwrap());
        assert_eq!(store.get_bundle(&TxId::new([1; 32])).unwrap().unwrap().block, 10);
    }

    #[test]
    fn attempts_count_only_while_unknown() {
        let (_dir, store) = open();
        let id = TxId::new([1; 32]);
        store.insert_bundle(&bundle(1, 10, None)).unwrap();

        let first = store.begin_verify_attempt(&id, Timestamp::new(5)).unwrap().unwrap();
        assert_eq!(first.verify_attempts, 1);
        assert_eq!(first.last_attempt_at, Some(Timestamp::new(5)));
        store.begin_verify_attempt(&id, Timestamp::new(6)).unwrap();

        assert!(store.finalize_bundle(&id, Validity::Valid, Timestamp::new(7)).unwrap());
        let decided = store.begin_verify_attempt(&id, Timestamp::new(8)).unwrap().unwrap();
        assert_eq!(decided.verify_attempts, 2);
        assert_eq!(decided.validity, Validity::Valid);

        assert!(store
            .begin_verify_attempt(&TxId::new([2; 32]), Timestamp::new(8))
            .unwrap()
            .is_none());
    }

    #[test]
    fn finalize_is_one_shot() {
        let (_dir, store) = open();
        let id = TxId::new([1; 32]);
        store.insert_bundle(&bundle(1, 10, None)).unwrap();
        assert!(store.finalize_bundle(&id, Validity::Invalid, Timestamp::new(2)).unwrap());
        assert!(!store.finalize_bundle(&id, Validity::Valid, Timestamp::new(3)).unwrap());
        let rec = store.get_bundle(&id).unwrap().unwrap();
        assert_eq!(rec.validity, Validity::Invalid);
        assert_eq!(rec.last_verified_at, Some(Timestamp::new(2)));
    }

    #[test]
    fn due_bundles_ordered_and_limited() {
        let (_dir, store) = open();
        store.insert_bundle(&bundle(1, 30, None)).unwrap();
        store.insert_bundle(&bundle(2, 10, None)).unwrap();
        store.insert_bundle(&bundle(3, 20, None)).unwrap();
        store.insert_bundle(&bundle(4, 500, None)).unwrap();
        store
            .begin_verify_attempt(&TxId::new([3; 32]), Timestamp::new(100))
            .unwrap();

        let due: Vec<_> = store
            .bundles_due_for_verification(100, Timestamp::new(50), 10)
            .unwrap()
            .into_iter()
            .map(|b| b.block)
            .collect();
        assert_eq!(due, vec![10, 30]);

        let limited = store
            .bundles_due_for_verification(100, Timestamp::new(100), 2)
            .unwrap();
        assert_eq!(limited.iter().map(|b| b.block).collect::<Vec<_>>(), vec![10, 20]);
    }

    #[test]
    fn latest_block_per_node() {
        let (_dir, store) = open();
        store.insert_bundle(&bundle(1, 30, Some("https://a"))).unwrap();
        store.insert_bundle(&bundle(2, 70, Some("https://a"))).unwrap();
        store.insert_bundle(&bundle(3, 90, Some("https://b"))).unwrap();
        assert_eq!(store.latest_block_for_node("https://a").unwrap(), Some(70));
        assert_eq!(store.latest_block_for_node("https://c").unwrap(), None);
    }
}
