//! Requests that fall back across peers and finally the gateway.

use std::sync::Arc;
use std::time::Duration;

use whistle_protocol::{endpoints, HttpResponse, HttpTransport};

use crate::peer_directory::{normalize_url, PeerDirectory};
use crate::request::{get_with_retry, AttemptFailure, RetryPolicy};
use crate::FetchError;

/// How trust updates triggered by a request are applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeedbackMode {
    /// Spawned off the caller's path.
    #[default]
    Background,
    /// Applied before `request` returns.
    Inline,
}

#[derive(Clone, Debug)]
pub struct FetcherConfig {
    pub gateway_url: String,
    /// Peers drawn from the directory when no shortlist is given.
    pub fallback_peer_count: usize,
    pub peer_policy: RetryPolicy,
    pub feedback: FeedbackMode,
}

impl FetcherConfig {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: normalize_url(&gateway_url.into()),
            fallback_peer_count: 20,
            peer_policy: RetryPolicy::new(1, Duration::from_secs(10)),
            feedback: FeedbackMode::Background,
        }
    }
}

/// Per-call overrides.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Try exactly these peers (then the gateway) instead of asking the directory.
    pub shortlist: Option<Vec<String>>,
    pub peer_count: Option<usize>,
    pub retries: Option<u32>,
    pub timeout: Option<Duration>,
    /// On total failure, return the last non-2xx response instead of an error.
    pub return_last: bool,
    /// Skip the directory and go straight to the gateway.
    pub gateway_only: bool,
}

impl RequestOptions {
    pub fn return_last() -> Self {
        Self {
            return_last: true,
            ..Self::default()
        }
    }

    pub fn shortlist(peers: Vec<String>) -> Self {
        Self {
            shortlist: Some(peers),
            ..Self::default()
        }
    }

    pub fn gateway_only() -> Self {
        Self {
            gateway_only: true,
            ..Self::default()
        }
    }
}

pub struct FallbackFetcher {
    directory: Arc<PeerDirectory>,
    transport: Arc<dyn HttpTransport>,
    config: FetcherConfig,
}

impl FallbackFetcher {
    pub fn new(directory: Arc<PeerDirectory>, transport: Arc<dyn HttpTransport>, config: FetcherConfig) -> Self {
        Self {
            directory,
            transport,
            config,
        }
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn gateway_url(&self) -> &str {
        &self.config.gateway_url
    }

    fn candidates(&self, options: &RequestOptions) -> Vec<String> {
        let mut candidates = if options.gateway_only {
            Vec::new()
        } else if let Some(shortlist) = &options.shortlist {
            shortlist.iter().map(|p| normalize_url(p)).collect()
        } else {
            let count = options.peer_count.unwrap_or(self.config.fallback_peer_count);
            self.directory.select_peers(count, true).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "peer selection failed, using gateway only");
                Vec::new()
            })
        };
        candidates.retain(|c| *c != self.config.gateway_url);
        candidates.push(self.config.gateway_url.clone());
        candidates
    }

    /// GET `path` from each candidate in turn. On the first success every
    /// earlier candidate is penalized and the winner praised. Total failure
    /// penalizes nobody.
    pub async fn request(&self, path: &str, options: &RequestOptions) -> Result<HttpResponse, FetchError> {
        let candidates = self.candidates(options);
        let policy = RetryPolicy {
            retries: options.retries.unwrap_or(self.config.peer_policy.retries),
            timeout: options.timeout.unwrap_or(self.config.peer_policy.timeout),
            backoff: self.config.peer_policy.backoff,
        };

        let mut last: Option<AttemptFailure> = None;
        for (i, base) in candidates.iter().enumerate() {
            let url = endpoints::join(base, path);
            match get_with_retry(self.transport.as_ref(), &url, policy).await {
                Ok(response) => {
                    self.feedback(candidates[..i].to_vec(), base.clone());
                    return Ok(response);
                }
                Err(failure) => {
                    tracing::debug!(peer = %base, path, error = %failure, "candidate failed");
                    last = Some(failure);
                }
            }
        }

        match last {
            Some(AttemptFailure::Status(response)) if options.return_last => Ok(response),
            last => Err(FetchError::Exhausted {
                path: path.to_string(),
                tried: candidates.len(),
                last: last.map_or_else(|| "no candidates".to_string(), |f| f.to_string()),
            }),
        }
    }

    fn feedback(&self, failed: Vec<String>, succeeded: String) {
        let directory = Arc::clone(&self.directory);
        let gateway = self.config.gateway_url.clone();
        let apply = move || {
            for peer in failed.iter().filter(|p| **p != gateway) {
                if let Err(e) = directory.penalize_default(peer) {
                    tracing::warn!(peer = %peer, error = %e, "failed to penalize peer");
                }
            }
            if succeeded != gateway {
                if let Err(e) = directory.praise(&succeeded) {
                    tracing::warn!(peer = %succeeded, error = %e, "failed to praise peer");
                }
            }
        };
        match self.config.feedback {
            FeedbackMode::Background => {
                tokio::spawn(async move { apply() });
            }
            FeedbackMode::Inline => apply(),
        }
    }
}
