//! Bundler identity lookups.

use std::time::Duration;

use whistle_crypto::owner_address_b64;
use whistle_protocol::{endpoints, HttpTransport, ProtocolError};

use crate::request::{get_with_retry, AttemptFailure, RetryPolicy};
use crate::NetworkError;

/// Fetch the bundler's signing key from `/public` and derive the ledger
/// address its bundles are posted from.
pub async fn fetch_bundler_address(transport: &dyn HttpTransport, bundler_url: &str) -> Result<String, NetworkError> {
    let url = endpoints::join(bundler_url, endpoints::BUNDLER_PUBLIC_KEY);
    let policy = RetryPolicy::new(3, Duration::from_secs(10));
    let response = get_with_retry(transport, &url, policy)
        .await
        .map_err(|failure| match failure {
            AttemptFailure::Transport(e) => NetworkError::Transport(e),
            AttemptFailure::Status(r) => NetworkError::Protocol(ProtocolError::UnexpectedStatus {
                status: r.status,
                url: url.clone(),
            }),
        })?;
    let text = response.text();
    let key = text.trim().trim_matches('"');
    Ok(owner_address_b64(key)?)
}
