//! Cached network height with single-flight refresh.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use whistle_protocol::{endpoints, HttpTransport, NodeInfo, ProtocolError};
use whistle_types::{Clock, Timestamp};

use crate::peer_directory::normalize_url;
use crate::request::{get_with_retry, AttemptFailure, RetryPolicy};
use crate::NetworkError;

#[derive(Clone, Copy, Debug)]
struct Cached {
    height: u64,
    fetched_at: Timestamp,
}

/// The gateway's current height, refreshed at most once per `ttl_secs`.
///
/// The cache lock is held across the refresh, so concurrent callers that
/// find it stale wait for one request instead of issuing their own.
pub struct HeightCache {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    info_url: String,
    ttl_secs: u64,
    policy: RetryPolicy,
    cached: Mutex<Option<Cached>>,
}

impl HeightCache {
    pub fn new(transport: Arc<dyn HttpTransport>, clock: Arc<dyn Clock>, gateway_url: &str, ttl_secs: u64) -> Self {
        Self {
            transport,
            clock,
            info_url: endpoints::join(&normalize_url(gateway_url), endpoints::INFO),
            ttl_secs,
            policy: RetryPolicy::new(3, Duration::from_secs(10)),
            cached: Mutex::new(None),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn height(&self) -> Result<u64, NetworkError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();
        if let Some(c) = *cached {
            if !c.fetched_at.has_expired(self.ttl_secs, now) {
                return Ok(c.height);
            }
        }

        tracing::debug!(url = %self.info_url, "refreshing network height");
        let response = get_with_retry(self.transport.as_ref(), &self.info_url, self.policy)
            .await
            .map_err(|failure| match failure {
                AttemptFailure::Transport(e) => NetworkError::Transport(e),
                AttemptFailure::Status(r) => NetworkError::Protocol(ProtocolError::UnexpectedStatus {
                    status: r.status,
                    url: self.info_url.clone(),
                }),
            })?;
        let info: NodeInfo = response.json()?;
        *cached = Some(Cached {
            height: info.height,
            fetched_at: now,
        });
        Ok(info.height)
    }

    /// Drop the cached value so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
