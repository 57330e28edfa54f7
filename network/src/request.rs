//! Single-target requests with a small retry budget.

use std::fmt;
use std::time::Duration;

use whistle_protocol::{HttpResponse, HttpTransport, TransportError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    pub timeout: Duration,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        Self {
            retries,
            timeout,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Why the last attempt against a target failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptFailure {
    Transport(TransportError),
    /// The target answered with a non-2xx status.
    Status(HttpResponse),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Status(r) => write!(f, "status {}", r.status),
        }
    }
}

async fn retry<F, Fut>(policy: RetryPolicy, url: &str, mut attempt: F) -> Result<HttpResponse, AttemptFailure>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<HttpResponse, TransportError>>,
{
    let mut delay = policy.backoff;
    let mut n = 0;
    loop {
        let failure = match attempt().await {
            Ok(r) if r.is_success() => return Ok(r),
            Ok(r) => AttemptFailure::Status(r),
            Err(e) => AttemptFailure::Transport(e),
        };
        tracing::debug!(url, attempt = n, error = %failure, "request failed");
        if n >= policy.retries {
            return Err(failure);
        }
        n += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }
}

/// GET `url`, retrying transport errors and non-2xx statuses.
pub async fn get_with_retry(
    transport: &dyn HttpTransport,
    url: &str,
    policy: RetryPolicy,
) -> Result<HttpResponse, AttemptFailure> {
    retry(policy, url, || transport.get(url, policy.timeout)).await
}

/// POST a JSON body to `url` under the same retry rules as [`get_with_retry`].
pub async fn post_with_retry(
    transport: &dyn HttpTransport,
    url: &str,
    body: &serde_json::Value,
    policy: RetryPolicy,
) -> Result<HttpResponse, AttemptFailure> {
    retry(policy, url, || transport.post_json(url, body, policy.timeout)).await
}
