//! LMDB implementation of BundlerStore.

use whistle_store::bundler::BundlerStore;
use whistle_store::StoreError;
use whistle_types::BundlerRecord;

use crate::environment::{decode, encode};
use crate::{LmdbEnvironment, LmdbError};

impl BundlerStore for LmdbEnvironment {
    fn insert_bundler(&self, record: &BundlerRecord) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self
            .bundlers_db
            .get(&wtxn, record.url.as_bytes())
            .map_err(LmdbError::from)?
            .is_some()
        {
            return Ok(false);
        }
        self.bundlers_db
            .put(&mut wtxn, record.url.as_bytes(), &encode(record)?)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn bundlers(&self) -> Result<Vec<BundlerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self.bundlers_db.iter(&rtxn).map_err(LmdbError::from)?;
        let mut result = Vec::new();
        for entry in iter {
            let (_, value) = entry.map_err(LmdbError::from)?;
            result.push(decode(value)?);
        }
        Ok(result)
    }

    fn bundler_by_address(&self, address: &str) -> Result<Option<BundlerRecord>, StoreError> {
        Ok(self.bundlers()?.into_iter().find(|b| b.address == address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_address() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbEnvironment::open(dir.path(), 16 * 1024 * 1024).unwrap();
        let rec = BundlerRecord {
            url: "https://node1.example".into(),
            address: "OWNER_ADDR".into(),
        };
        assert!(store.insert_bundler(&rec).unwrap());
        assert!(!store.insert_bundler(&rec).unwrap());
        assert_eq!(store.bundler_by_address("OWNER_ADDR").unwrap(), Some(rec));
        assert_eq!(store.bundler_by_address("other").unwrap(), None);
        assert_eq!(store.bundlers().unwrap().len(), 1);
    }
}
