//! Trust-scored directory of ledger peers.
//!
//! Scores live in the store and are only changed through single-row
//! conditional updates, so any number of concurrent fetchers (or processes
//! sharing the store) can praise and penalize without a process lock.

use futures_util::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use whistle_protocol::{endpoints, HttpTransport, NodeInfo};
use whistle_store::{StoreError, WatchdogStore};
use whistle_types::params::{penalized_trust, praised_trust, DEFAULT_PENALTY, MIN_PEER_RELEASE, STARTING_TRUST};
use whistle_types::{Clock, PeerRecord};

use crate::request::{get_with_retry, RetryPolicy};

#[derive(Clone, Debug)]
pub struct PeerDirectoryConfig {
    /// Never handed out by [`PeerDirectory::select_peers`]; fallbacks append it themselves.
    pub gateway_url: String,
    /// Share of a randomized selection drawn uniformly from outside the top scores.
    pub exploration_ratio: f64,
    pub starting_trust: f64,
    pub penalty: f64,
    pub min_release: u64,
    pub probe_policy: RetryPolicy,
    pub probe_concurrency: usize,
}

impl PeerDirectoryConfig {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: normalize_url(&gateway_url.into()),
            exploration_ratio: 0.25,
            starting_trust: STARTING_TRUST,
            penalty: DEFAULT_PENALTY,
            min_release: MIN_PEER_RELEASE,
            probe_policy: RetryPolicy::new(1, Duration::from_secs(5)),
            probe_concurrency: 20,
        }
    }
}

/// Canonical peer key: no trailing slash.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

pub struct PeerDirectory {
    store: Arc<dyn WatchdogStore>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    config: PeerDirectoryConfig,
}

impl PeerDirectory {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        config: PeerDirectoryConfig,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PeerDirectoryConfig {
        &self.config
    }

    pub fn gateway_url(&self) -> &str {
        &self.config.gateway_url
    }

    /// Up to `count` peer URLs, highest trust first. With `randomize`, a
    /// share of the slots goes to peers sampled from below the top scores so
    /// an under-scored but healthy peer can earn its way back.
    pub fn select_peers(&self, count: usize, randomize: bool) -> Result<Vec<String>, StoreError> {
        let mut ranked: Vec<PeerRecord> = self
            .store
            .peers()?
            .into_iter()
            .filter(|p| p.url != self.config.gateway_url)
            .collect();
        ranked.sort_by(|a, b| b.trust.total_cmp(&a.trust));

        if !randomize || ranked.len() <= count {
            return Ok(ranked.into_iter().take(count).map(|p| p.url).collect());
        }

        let explore = ((count as f64) * self.config.exploration_ratio.clamp(0.0, 1.0)).round() as usize;
        let exploit = count - explore.min(count);
        let rest = ranked.split_off(exploit);

        let mut rng = rand::thread_rng();
        let mut selected: Vec<String> = ranked.into_iter().map(|p| p.url).collect();
        selected.extend(rest.choose_multiple(&mut rng, count - exploit).map(|p| p.url.clone()));
        Ok(selected)
    }

    /// Subtract `amount` from the peer's trust, floored at zero.
    pub fn penalize(&self, url: &str, amount: f64) -> Result<Option<f64>, StoreError> {
        let trust = self
            .store
            .update_trust(url, &|t| penalized_trust(t, amount), None)?;
        tracing::debug!(peer = url, ?trust, "penalized peer");
        Ok(trust)
    }

    /// Penalize by the configured default amount.
    pub fn penalize_default(&self, url: &str) -> Result<Option<f64>, StoreError> {
        self.penalize(url, self.config.penalty)
    }

    /// Raise the peer's trust along the diminishing-returns curve, capped at the maximum.
    pub fn praise(&self, url: &str) -> Result<Option<f64>, StoreError> {
        let trust = self
            .store
            .update_trust(url, &praised_trust, Some(self.clock.now()))?;
        tracing::debug!(peer = url, ?trust, "praised peer");
        Ok(trust)
    }

    /// Probe each unknown candidate's `/info` and insert those running a
    /// supported release. Returns how many rows were created.
    pub async fn add_peers(&self, candidates: &[String]) -> Result<usize, StoreError> {
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for candidate in candidates {
            let url = normalize_url(candidate);
            if url.is_empty() || !seen.insert(url.clone()) {
                continue;
            }
            if self.store.get_peer(&url)?.is_none() {
                fresh.push(url);
            }
        }

        let supported: Vec<String> = stream::iter(fresh)
            .map(|url| async move {
                let supported = self.probe(&url).await;
                (url, supported)
            })
            .buffer_unordered(self.config.probe_concurrency.max(1))
            .filter_map(|(url, supported)| async move { supported.then_some(url) })
            .collect()
            .await;

        let now = self.clock.now();
        let mut added = 0;
        for url in supported {
            if self
                .store
                .insert_peer(&PeerRecord::new(url, self.config.starting_trust, now))?
            {
                added += 1;
            }
        }
        tracing::info!(candidates = candidates.len(), added, "added peers");
        Ok(added)
    }

    async fn probe(&self, url: &str) -> bool {
        let info_url = endpoints::join(url, endpoints::INFO);
        match get_with_retry(self.transport.as_ref(), &info_url, self.config.probe_policy).await {
            Ok(response) => match response.json::<NodeInfo>() {
                Ok(info) => info.release >= self.config.min_release,
                Err(e) => {
                    tracing::debug!(peer = url, error = %e, "unreadable /info");
                    false
                }
            },
            Err(_) => false,
        }
    }
}
