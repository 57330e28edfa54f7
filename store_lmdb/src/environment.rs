//! LMDB environment setup.

use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::LmdbError;

/// The schema version this code writes.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub(crate) const DATABASE_NAMES: &[&str] = &[
    "transactions",
    "tx_by_deadline",
    "bundles",
    "peers",
    "bundlers",
    "meta",
];

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    pub(crate) env: Arc<Env>,
    /// id → bincode `TransactionRecord`
    pub(crate) transactions_db: Database<Bytes, Bytes>,
    /// deadline_height (BE) ‖ id → empty; ordered deadline scans
    pub(crate) tx_by_deadline_db: Database<Bytes, Bytes>,
    /// id → bincode `BundleRecord`
    pub(crate) bundles_db: Database<Bytes, Bytes>,
    /// url → bincode `PeerRecord`
    pub(crate) peers_db: Database<Bytes, Bytes>,
    /// url → bincode `BundlerRecord`
    pub(crate) bundlers_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment in `path`.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;
        // SAFETY: the environment is opened once per process and the files are
        // not modified by anything other than this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(DATABASE_NAMES.len() as u32)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let transactions_db = env.create_database(&mut wtxn, Some("transactions"))?;
        let tx_by_deadline_db = env.create_database(&mut wtxn, Some("tx_by_deadline"))?;
        let bundles_db = env.create_database(&mut wtxn, Some("bundles"))?;
        let peers_db = env.create_database(&mut wtxn, Some("peers"))?;
        let bundlers_db = env.create_database(&mut wtxn, Some("bundlers"))?;
        let meta_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("meta"))?;

        let found = meta_db
            .get(&wtxn, SCHEMA_VERSION_KEY)?
            .and_then(|v| <[u8; 4]>::try_from(v).ok())
            .map(u32::from_le_bytes);
        match found {
            Some(v) if v > SCHEMA_VERSION => {
                return Err(LmdbError::SchemaTooNew {
                    found: v,
                    supported: SCHEMA_VERSION,
                })
            }
            Some(_) => {}
            None => meta_db.put(&mut wtxn, SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_le_bytes())?,
        }
        wtxn.commit()?;

        tracing::info!(path = %path.display(), map_size, "opened LMDB environment");

        Ok(Self {
            env: Arc::new(env),
            transactions_db,
            tx_by_deadline_db,
            bundles_db,
            peers_db,
            bundlers_db,
            meta_db,
        })
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn schema_version(&self) -> Result<Option<u32>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .meta_db
            .get(&rtxn, SCHEMA_VERSION_KEY)?
            .and_then(|v| <[u8; 4]>::try_from(v).ok())
            .map(u32::from_le_bytes))
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbError> {
    Ok(bincode::deserialize(bytes)?)
}
