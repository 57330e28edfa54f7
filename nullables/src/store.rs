//! Nullable store: thread-safe in-memory storage for testing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use whistle_store::bundle::{is_due, BundleStore};
use whistle_store::bundler::BundlerStore;
use whistle_store::peer::PeerStore;
use whistle_store::transaction::{is_expired_unresolved, is_orphan_due, TransactionStore};
use whistle_store::StoreError;
use whistle_types::params::clamp_trust;
use whistle_types::{BundleRecord, BundlerRecord, PeerRecord, Timestamp, TransactionRecord, TxId, Validity};

/// An in-memory implementation of every watchdog store trait.
/// Thread-safe for use with tokio's multi-threaded runtime.
#[derive(Default)]
pub struct NullStore {
    transactions: Mutex<HashMap<TxId, TransactionRecord>>,
    bundles: Mutex<HashMap<TxId, BundleRecord>>,
    peers: Mutex<HashMap<String, PeerRecord>>,
    bundlers: Mutex<HashMap<String, BundlerRecord>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().expect("null store lock poisoned")
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a transaction row as-is.
    pub fn put_transaction(&self, record: TransactionRecord) {
        lock(&self.transactions).insert(record.id, record);
    }

    /// Overwrite a bundle row as-is.
    pub fn put_bundle(&self, record: BundleRecord) {
        lock(&self.bundles).insert(record.id, record);
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        lock(&self.transactions).values().cloned().collect()
    }

    pub fn bundles(&self) -> Vec<BundleRecord> {
        lock(&self.bundles).values().cloned().collect()
    }
}

impl TransactionStore for NullStore {
    fn insert_transaction(&self, record: &TransactionRecord) -> Result<bool, StoreError> {
        let mut txs = lock(&self.transactions);
        if txs.contains_key(&record.id) {
            return Ok(false);
        }
        txs.insert(record.id, record.clone());
        Ok(true)
    }

    fn upsert_receipt(&self, id: &TxId, deadline_height: u64, now: Timestamp) -> Result<(), StoreError> {
        lock(&self.transactions)
            .entry(*id)
            .and_modify(|t| t.deadline_height = deadline_height)
            .or_insert_with(|| TransactionRecord::observed(*id, deadline_height, now));
        Ok(())
    }

    fn get_transaction(&self, id: &TxId) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(lock(&self.transactions).get(id).cloned())
    }

    fn link_valid_transactions(
        &self,
        ids: &[TxId],
        bundle: &TxId,
        now: Timestamp,
    ) -> Result<Vec<TxId>, StoreError> {
        let mut txs = lock(&self.transactions);
        let mut present = Vec::new();
        for id in ids {
            if let Some(t) = txs.get_mut(id) {
                t.validity = Validity::Valid;
                t.bundled_in = Some(*bundle);
                t.last_verified_at = Some(now);
                present.push(*id);
            }
        }
        Ok(present)
    }

    fn link_invalid_transactions(&self, ids: &[TxId], bundle: &TxId) -> Result<Vec<TxId>, StoreError> {
        let mut txs = lock(&self.transactions);
        let mut present = Vec::new();
        for id in ids {
            if let Some(t) = txs.get_mut(id) {
                present.push(*id);
                if t.validity.is_valid() {
                    continue;
                }
                t.validity = Validity::Invalid;
                t.bundled_in = Some(*bundle);
            }
        }
        Ok(present)
    }

    fn finalize_invalid_transaction(&self, id: &TxId, now: Timestamp) -> Result<bool, StoreError> {
        let mut txs = lock(&self.transactions);
        match txs.get_mut(id) {
            Some(t) if !t.validity.is_valid() && t.last_verified_at.is_none() => {
                t.validity = Validity::Invalid;
                t.last_verified_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn set_transaction_parent(&self, id: &TxId, bundle: &TxId) -> Result<bool, StoreError> {
        let mut txs = lock(&self.transactions);
        match txs.get_mut(id) {
            Some(t) if t.bundled_in.is_none() => {
                t.bundled_in = Some(*bundle);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn orphans_due(&self, max_deadline: u64) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut out: Vec<_> = lock(&self.transactions)
            .values()
            .filter(|t| is_orphan_due(t, max_deadline))
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.deadline_height, t.id));
        Ok(out)
    }

    fn expired_unresolved(&self, height: u64) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut out: Vec<_> = lock(&self.transactions)
            .values()
            .filter(|t| is_expired_unresolved(t, height))
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.bundled_in, t.deadline_height, t.id));
        Ok(out)
    }
}

impl BundleStore for NullStore {
    fn insert_bundle(&self, record: &BundleRecord) -> Result<bool, StoreError> {
        let mut bundles = lock(&self.bundles);
        if bundles.contains_key(&record.id) {
            return Ok(false);
        }
        bundles.insert(record.id, record.clone());
        Ok(true)
    }

    fn get_bundle(&self, id: &TxId) -> Result<Option<BundleRecord>, StoreError> {
        Ok(lock(&self.bundles).get(id).cloned())
    }

    fn begin_verify_attempt(&self, id: &TxId, now: Timestamp) -> Result<Option<BundleRecord>, StoreError> {
        let mut bundles = lock(&self.bundles);
        let Some(b) = bundles.get_mut(id) else {
            return Ok(None);
        };
        if !b.validity.is_decided() {
            b.verify_attempts = b.verify_attempts.saturating_add(1);
            b.last_attempt_at = Some(now);
        }
        Ok(Some(b.clone()))
    }

    fn finalize_bundle(&self, id: &TxId, validity: Validity, now: Timestamp) -> Result<bool, StoreError> {
        let mut bundles = lock(&self.bundles);
        match bundles.get_mut(id) {
            Some(b) if !b.validity.is_decided() => {
                b.validity = validity;
                b.last_verified_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn bundles_due_for_verification(
        &self,
        max_block: u64,
        retry_cutoff: Timestamp,
        limit: usize,
    ) -> Result<Vec<BundleRecord>, StoreError> {
        let mut due: Vec<_> = lock(&self.bundles)
            .values()
            .filter(|b| is_due(b, max_block, retry_cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|b| (b.block, b.id));
        due.truncate(limit);
        Ok(due)
    }

    fn latest_block_for_node(&self, node: &str) -> Result<Option<u64>, StoreError> {
        Ok(lock(&self.bundles)
            .values()
            .filter(|b| b.from_node.as_deref() == Some(node))
            .map(|b| b.block)
            .max())
    }
}

impl PeerStore for NullStore {
    fn insert_peer(&self, record: &PeerRecord) -> Result<bool, StoreError> {
        let mut peers = lock(&self.peers);
        if peers.contains_key(&record.url) {
            return Ok(false);
        }
        peers.insert(record.url.clone(), record.clone());
        Ok(true)
    }

    fn get_peer(&self, url: &str) -> Result<Option<PeerRecord>, StoreError> {
        Ok(lock(&self.peers).get(url).cloned())
    }

    fn peers(&self) -> Result<Vec<PeerRecord>, StoreError> {
        let mut all: Vec<_> = lock(&self.peers).values().cloned().collect();
        all.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(all)
    }

    fn update_trust(
        &self,
        url: &str,
        adjust: &dyn Fn(f64) -> f64,
        praised_at: Option<Timestamp>,
    ) -> Result<Option<f64>, StoreError> {
        let mut peers = lock(&self.peers);
        let Some(p) = peers.get_mut(url) else {
            return Ok(None);
        };
        p.trust = clamp_trust(adjust(p.trust));
        if praised_at.is_some() {
            p.last_praised_at = praised_at;
        }
        Ok(Some(p.trust))
    }
}

impl BundlerStore for NullStore {
    fn insert_bundler(&self, record: &BundlerRecord) -> Result<bool, StoreError> {
        let mut bundlers = lock(&self.bundlers);
        if bundlers.contains_key(&record.url) {
            return Ok(false);
        }
        bundlers.insert(record.url.clone(), record.clone());
        Ok(true)
    }

    fn bundlers(&self) -> Result<Vec<BundlerRecord>, StoreError> {
        let mut all: Vec<_> = lock(&self.bundlers).values().cloned().collect();
        all.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(all)
    }

    fn bundler_by_address(&self, address: &str) -> Result<Option<BundlerRecord>, StoreError> {
        Ok(lock(&self.bundlers).values().find(|b| b.address == address).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_updates_match_lmdb_semantics() {
        let store = NullStore::new();
        let id = TxId::new([1; 32]);
        store
            .insert_bundle(&BundleRecord::discovered(id, 10, None, Timestamp::new(0)))
            .unwrap();
        assert_eq!(
            store.begin_verify_attempt(&id, Timestamp::new(1)).unwrap().unwrap().verify_attempts,
            1
        );
        assert!(store.finalize_bundle(&id, Validity::Valid, Timestamp::new(2)).unwrap());
        assert!(!store.finalize_bundle(&id, Validity::Invalid, Timestamp::new(3)).unwrap());
        assert_eq!(
            store.begin_verify_attempt(&id, Timestamp::new(4)).unwrap().unwrap().verify_attempts,
            1
        );
    }
}
