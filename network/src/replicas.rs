//! Count peers that hold a full copy of a transaction's bytes.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use whistle_protocol::{endpoints, HttpTransport, SyncRecord, TxOffset};
use whistle_store::{StoreError, WatchdogStore};

use crate::request::{get_with_retry, RetryPolicy};

const PAGE: usize = 100;

pub struct ReplicaProbe {
    store: Arc<dyn WatchdogStore>,
    transport: Arc<dyn HttpTransport>,
    concurrency: usize,
    policy: RetryPolicy,
}

impl ReplicaProbe {
    pub fn new(store: Arc<dyn WatchdogStore>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            store,
            transport,
            concurrency: 10,
            policy: RetryPolicy::new(0, Duration::from_millis(7_500)),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether `peer`'s first sync record spans the whole transaction.
    pub async fn has_data(&self, peer: &str, location: &TxOffset) -> bool {
        let Ok(start) = location.start() else {
            return false;
        };
        let url = endpoints::join(peer, &endpoints::data_sync_record(start, 1));
        let Ok(response) = get_with_retry(self.transport.as_ref(), &url, self.policy).await else {
            return false;
        };
        match SyncRecord::parse_list(&response.body) {
            Ok(records) => records.first().is_some_and(|r| r.covers(location)),
            Err(e) => {
                tracing::debug!(peer, error = %e, "unreadable sync record");
                false
            }
        }
    }

    /// Probe peers in trust order, stopping once `minimum` full replicas are
    /// found. Returns the count found, which is below `minimum` only if every
    /// peer was probed.
    pub async fn count_full_replicas(&self, location: &TxOffset, minimum: usize) -> Result<usize, StoreError> {
        let peers = self.store.peers_by_trust(usize::MAX)?;
        let mut found = 0;
        for page in peers.chunks(PAGE) {
            let probes: Vec<_> = page.iter().map(|peer| self.has_data(&peer.url, location)).collect();
            let mut probes = stream::iter(probes).buffer_unordered(self.concurrency);
            while let Some(has) = probes.next().await {
                if has {
                    found += 1;
                    if found >= minimum {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }
}
