//! Watched bundler storage trait.

use crate::StoreError;
use whistle_types::BundlerRecord;

pub trait BundlerStore {
    /// Insert-or-ignore by url. Returns whether a row was created.
    fn insert_bundler(&self, record: &BundlerRecord) -> Result<bool, StoreError>;

    fn bundlers(&self) -> Result<Vec<BundlerRecord>, StoreError>;

    fn bundler_by_address(&self, address: &str) -> Result<Option<BundlerRecord>, StoreError>;
}
