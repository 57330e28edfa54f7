//! LMDB implementation of PeerStore.

use whistle_store::peer::PeerStore;
use whistle_store::StoreError;
use whistle_types::params::clamp_trust;
use whistle_types::{PeerRecord, Timestamp};

use crate::environment::{decode, encode};
use crate::{LmdbEnvironment, LmdbError};

impl PeerStore for LmdbEnvironment {
    fn insert_peer(&self, record: &PeerRecord) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self
            .peers_db
            .get(&wtxn, record.url.as_bytes())
            .map_err(LmdbError::from)?
            .is_some()
        {
            return Ok(false);
        }
        self.peers_db
            .put(&mut wtxn, record.url.as_bytes(), &encode(record)?)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn get_peer(&self, url: &str) -> Result<Option<PeerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self.peers_db.get(&rtxn, url.as_bytes()).map_err(LmdbError::from)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn peers(&self) -> Result<Vec<PeerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self.peers_db.iter(&rtxn).map_err(LmdbError::from)?;
        let mut result = Vec::new();
        for entry in iter {
            let (_, value) = entry.map_err(LmdbError::from)?;
            result.push(decode(value)?);
        }
        Ok(result)
    }

    fn update_trust(
        &self,
        url: &str,
        adjust: &dyn Fn(f64) -> f64,
        praised_at: Option<Timestamp>,
    ) -> Result<Option<f64>, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut record: PeerRecord = match self.peers_db.get(&wtxn, url.as_bytes()).map_err(LmdbError::from)? {
            Some(bytes) => decode(bytes)?,
            None => return Ok(None),
        };
        record.trust = clamp_trust(adjust(record.trust));
        if praised_at.is_some() {
            record.last_praised_at = praised_at;
        }
        self.peers_db
            .put(&mut wtxn, url.as_bytes(), &encode(&record)?)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Some(record.trust))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whistle_types::params::{penalized_trust, praised_trust, DEFAULT_PENALTY, STARTING_TRUST};

    fn open() -> (tempfile::TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 16 * 1024 * 1024).unwrap();
        (dir, env)
    }

    #[test]
    fn peers_sorted_by_trust() {
        let (_dir, store) = open();
        for (url, trust) in [("http://a", 5.0), ("http://b", 50.0), ("http://c", 20.0)] {
            assert!(store.insert_peer(&PeerRecord::new(url, trust, Timestamp::new(1))).unwrap());
        }
        assert!(!store
            .insert_peer(&PeerRecord::new("http://a", 99.0, Timestamp::new(1)))
            .unwrap());
        let top: Vec<_> = store.peers_by_trust(2).unwrap().into_iter().map(|p| p.url).collect();
        assert_eq!(top, vec!["http://b".to_string(), "http://c".to_string()]);
    }

    #[test]
    fn trust_updates_are_clamped() {
        let (_dir, store) = open();
        store
            .insert_peer(&PeerRecord::new("http://a", 1.0, Timestamp::new(1)))
            .unwrap();
        let trust = store
            .update_trust("http://a", &|t| penalized_trust(t, DEFAULT_PENALTY), None)
            .unwrap();
        assert_eq!(trust, Some(0.0));

        let trust = store
            .update_trust("http://a", &praised_trust, Some(Timestamp::new(9)))
            .unwrap()
            .unwrap();
        assert!(trust > 0.0);
        let rec = store.get_peer("http://a").unwrap().unwrap();
        assert_eq!(rec.last_praised_at, Some(Timestamp::new(9)));

        assert_eq!(store.update_trust("http://x", &|_| STARTING_TRUST, None).unwrap(), None);
    }
}
