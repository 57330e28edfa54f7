//! Nullable network: scripted HTTP responses and a request log.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use whistle_crypto::encode_b64url;
use whistle_protocol::{endpoints, HttpResponse, HttpTransport, TransportError};
use whistle_types::params::CHUNK_SIZE;
use whistle_types::TxId;

/// What a scripted route answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Response(HttpResponse),
    Timeout,
    Refused,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Response(HttpResponse::new(200, value.to_string()))
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::Response(HttpResponse::new(200, body.into()))
    }

    pub fn status(status: u16) -> Self {
        Self::Response(HttpResponse::new(status, ""))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Default)]
struct Route {
    once: VecDeque<Reply>,
    always: Option<Reply>,
}

/// A transport whose answers are scripted per method and URL. Unscripted
/// URLs refuse the connection.
#[derive(Default)]
pub struct NullNetwork {
    routes: Mutex<HashMap<(Method, String), Route>>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl NullNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(&self, method: Method, url: &str, f: impl FnOnce(&mut Route)) {
        let mut routes = self.routes.lock().expect("null network lock poisoned");
        f(routes.entry((method, url.to_string())).or_default());
    }

    /// Answer every GET of `url` with `reply`.
    pub fn on_get(&self, url: &str, reply: Reply) {
        self.route(Method::Get, url, |r| r.always = Some(reply));
    }

    /// Answer the next GET of `url` with `reply`, ahead of any standing reply.
    pub fn on_get_once(&self, url: &str, reply: Reply) {
        self.route(Method::Get, url, |r| r.once.push_back(reply));
    }

    pub fn on_post(&self, url: &str, reply: Reply) {
        self.route(Method::Post, url, |r| r.always = Some(reply));
    }

    pub fn on_post_once(&self, url: &str, reply: Reply) {
        self.route(Method::Post, url, |r| r.once.push_back(reply));
    }

    /// Serve `/info` for `node` at the given release and height.
    pub fn serve_info(&self, node: &str, release: u64, height: u64) {
        self.on_get(
            &endpoints::join(node, endpoints::INFO),
            Reply::json(serde_json::json!({ "release": release, "height": height, "network": "arweave.N.1" })),
        );
    }

    /// Serve `/tx/{id}/status` for `node`.
    pub fn serve_status(&self, node: &str, id: &TxId, block_height: u64, confirmations: u64) {
        self.on_get(
            &endpoints::join(node, &endpoints::tx_status(id)),
            Reply::json(serde_json::json!({
                "block_height": block_height,
                "number_of_confirmations": confirmations,
            })),
        );
    }

    /// Serve `data` as transaction `id` from `node`: the offset lookup plus
    /// one chunk route per chunk, with the first byte at `start`.
    pub fn serve_transaction(&self, node: &str, id: &TxId, data: &[u8], start: u64) {
        let size = data.len() as u64;
        let end = start + size - 1;
        self.on_get(
            &endpoints::join(node, &endpoints::tx_offset(id)),
            Reply::json(serde_json::json!({ "offset": end.to_string(), "size": size.to_string() })),
        );
        for (i, chunk) in data.chunks(CHUNK_SIZE as usize).enumerate() {
            let offset = start + CHUNK_SIZE * i as u64;
            self.on_get(
                &endpoints::join(node, &endpoints::chunk(offset)),
                Reply::json(serde_json::json!({ "chunk": encode_b64url(chunk) })),
            );
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().expect("null network lock poisoned").clone()
    }

    /// Number of requests made to exactly `url`.
    pub fn count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }

    /// Number of requests whose URL starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.url.starts_with(prefix)).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().expect("null network lock poisoned").clear();
    }

    fn answer(&self, method: Method, url: &str, body: Option<&serde_json::Value>) -> Result<HttpResponse, TransportError> {
        self.log.lock().expect("null network lock poisoned").push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });
        let reply = {
            let mut routes = self.routes.lock().expect("null network lock poisoned");
            routes
                .get_mut(&(method, url.to_string()))
                .and_then(|r| r.once.pop_front().or_else(|| r.always.clone()))
        };
        match reply {
            Some(Reply::Response(r)) => Ok(r),
            Some(Reply::Timeout) => Err(TransportError::Timeout { url: url.to_string() }),
            Some(Reply::Refused) | None => Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

#[async_trait]
impl HttpTransport for NullNetwork {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.answer(Method::Get, url, None)
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.answer(Method::Post, url, Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn once_replies_precede_standing_reply() {
        let net = NullNetwork::new();
        net.on_get("http://a/info", Reply::text("standing"));
        net.on_get_once("http://a/info", Reply::Timeout);
        let t = Duration::from_secs(1);
        assert!(matches!(
            net.get("http://a/info", t).await,
            Err(TransportError::Timeout { .. })
        ));
        assert_eq!(net.get("http://a/info", t).await.unwrap().text(), "standing");
        assert_eq!(net.count("http://a/info"), 2);
    }

    #[tokio::test]
    async fn unscripted_urls_refuse() {
        let net = NullNetwork::new();
        assert!(matches!(
            net.get("http://nowhere/", Duration::from_secs(1)).await,
            Err(TransportError::Connect { .. })
        ));
    }
}
