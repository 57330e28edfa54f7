//! reqwest-backed [`HttpTransport`].

use async_trait::async_trait;
use std::time::Duration;
use whistle_protocol::{HttpResponse, HttpTransport, TransportError};

use crate::NetworkError;

const USER_AGENT: &str = concat!("whistle/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }

    async fn finish(
        url: &str,
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<HttpResponse, TransportError> {
        let response = sent.map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        tracing::trace!(url, status, bytes = body.len(), "http response");
        Ok(HttpResponse::new(status, body))
    }
}

fn classify(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout { url: url.to_string() }
    } else if e.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        TransportError::Other {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let sent = self.client.get(url).timeout(timeout).send().await;
        Self::finish(url, sent).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let sent = self.client.post(url).json(body).timeout(timeout).send().await;
        Self::finish(url, sent).await
    }
}
