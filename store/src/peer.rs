//! Peer trust storage trait.

use crate::StoreError;
use whistle_types::{PeerRecord, Timestamp};

pub trait PeerStore {
    /// Insert-or-ignore by url. Returns whether a row was created.
    fn insert_peer(&self, record: &PeerRecord) -> Result<bool, StoreError>;

    fn get_peer(&self, url: &str) -> Result<Option<PeerRecord>, StoreError>;

    fn peers(&self) -> Result<Vec<PeerRecord>, StoreError>;

    /// Up to `limit` peers, highest trust first.
    fn peers_by_trust(&self, limit: usize) -> Result<Vec<PeerRecord>, StoreError> {
        let mut all = self.peers()?;
        all.sort_by(|a, b| b.trust.total_cmp(&a.trust));
        all.truncate(limit);
        Ok(all)
    }

    /// Apply `adjust` to the stored trust in one write, clamping the result to
    /// the trust bounds. `praised_at` is recorded when given. Returns the new
    /// trust, or `None` if the peer is unknown.
    fn update_trust(
        &self,
        url: &str,
        adjust: &dyn Fn(f64) -> f64,
        praised_at: Option<Timestamp>,
    ) -> Result<Option<f64>, StoreError>;
}
