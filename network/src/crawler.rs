//! Depth-limited peer discovery starting from the gateway.

use std::sync::Arc;
use std::time::Duration;

use whistle_protocol::{codec, endpoints, HttpTransport};
use whistle_store::StoreError;

use crate::peer_directory::PeerDirectory;
use crate::request::{get_with_retry, RetryPolicy};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Nodes whose `/peers` list was read.
    pub visited: usize,
    pub added: usize,
}

pub struct PeerCrawler {
    directory: Arc<PeerDirectory>,
    transport: Arc<dyn HttpTransport>,
    max_depth: u32,
    policy: RetryPolicy,
}

impl PeerCrawler {
    pub fn new(directory: Arc<PeerDirectory>, transport: Arc<dyn HttpTransport>, max_depth: u32) -> Self {
        Self {
            directory,
            transport,
            max_depth,
            policy: RetryPolicy::new(0, Duration::from_secs(3)),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register the gateway, then walk `/peers` depth-first, offering every
    /// hop's list to the directory.
    pub async fn crawl(&self) -> Result<CrawlReport, StoreError> {
        tracing::info!(max_depth = self.max_depth, "crawling for peers");
        let gateway = self.directory.gateway_url().to_string();
        let mut report = CrawlReport {
            added: self.directory.add_peers(std::slice::from_ref(&gateway)).await?,
            ..CrawlReport::default()
        };

        let mut stack = vec![(gateway, 0u32)];
        while let Some((node, depth)) = stack.pop() {
            if depth >= self.max_depth {
                continue;
            }
            let Some(peers) = self.peers_of(&node).await else {
                continue;
            };
            report.visited += 1;
            tracing::debug!(peer = %node, depth, found = peers.len(), "got peers");
            report.added += self.directory.add_peers(&peers).await?;
            // reversed so the first listed peer is explored first
            stack.extend(peers.into_iter().rev().map(|p| (p, depth + 1)));
        }

        tracing::info!(visited = report.visited, added = report.added, "finished crawling for peers");
        Ok(report)
    }

    async fn peers_of(&self, node: &str) -> Option<Vec<String>> {
        let url = endpoints::join(node, endpoints::PEERS);
        let response = match get_with_retry(self.transport.as_ref(), &url, self.policy).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(peer = node, error = %e, "peer list unavailable");
                return None;
            }
        };
        match codec::decode::<Vec<String>>(&response.body) {
            Ok(hosts) => Some(hosts.into_iter().map(|h| host_to_url(&h)).collect()),
            Err(e) => {
                tracing::debug!(peer = node, error = %e, "unreadable peer list");
                None
            }
        }
    }
}

/// `/peers` lists bare `host:port` entries.
fn host_to_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{host}")
    }
}
