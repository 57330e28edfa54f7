//! Bundler real-time feed listener.
//!
//! Each watched bundler exposes a transactions stream and a receipts stream
//! over websockets. Every stream is read over redundant connections opened a
//! moment apart so a reconnect on one does not lose messages; the
//! connections share one [`FeedDecoder`], whose ring drops the copies.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use whistle_protocol::{endpoints, FeedMessage, FeedStream, ProtocolError};

use crate::dedup::{RecentMessages, DEFAULT_DEDUP_CAPACITY};
use crate::peer_directory::normalize_url;
use crate::NetworkError;

/// Receives decoded, deduplicated feed messages.
#[async_trait]
pub trait FeedHandler: Send + Sync {
    async fn on_message(&self, node: &str, message: FeedMessage);

    fn on_duplicate(&self, _node: &str, _stream: FeedStream) {}

    fn on_malformed(&self, node: &str, stream: FeedStream, error: &ProtocolError) {
        tracing::warn!(node, stream = stream.as_str(), error = %error, "malformed feed message");
    }
}

#[derive(Debug)]
pub enum FrameOutcome {
    Accepted(FeedMessage),
    Duplicate,
    Malformed(ProtocolError),
}

/// Dedup and decode for one stream of one bundler.
pub struct FeedDecoder {
    stream: FeedStream,
    recent: Mutex<RecentMessages>,
}

impl FeedDecoder {
    pub fn new(stream: FeedStream, capacity: usize) -> Self {
        Self {
            stream,
            recent: Mutex::new(RecentMessages::new(capacity)),
        }
    }

    pub fn stream(&self) -> FeedStream {
        self.stream
    }

    pub fn accept(&self, frame: &[u8]) -> FrameOutcome {
        let duplicate = match self.recent.lock() {
            Ok(mut recent) => recent.is_duplicate(frame),
            Err(poisoned) => poisoned.into_inner().is_duplicate(frame),
        };
        if duplicate {
            return FrameOutcome::Duplicate;
        }
        match FeedMessage::decode(self.stream, frame) {
            Ok(message) => FrameOutcome::Accepted(message),
            Err(e) => FrameOutcome::Malformed(e),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FeedListenerConfig {
    pub connections: usize,
    /// Delay between opening successive redundant connections.
    pub stagger: Duration,
    /// A connection silent for this long is dropped and reopened.
    pub heartbeat: Duration,
    pub connect_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub dedup_capacity: usize,
}

impl Default for FeedListenerConfig {
    fn default() -> Self {
        Self {
            connections: 2,
            stagger: Duration::from_secs(1),
            heartbeat: Duration::from_secs(35),
            connect_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// `http(s)://host` → `ws(s)://host/ws/<stream>`.
pub fn feed_url(node_url: &str, stream: FeedStream) -> String {
    let base = normalize_url(node_url);
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base
    };
    endpoints::join(&base, stream.path())
}

enum SessionEnd {
    Shutdown,
    Closed,
}

pub struct FeedListener {
    node: String,
    url: String,
    decoder: FeedDecoder,
    handler: Arc<dyn FeedHandler>,
    config: FeedListenerConfig,
}

impl FeedListener {
    pub fn new(node_url: &str, stream: FeedStream, handler: Arc<dyn FeedHandler>, config: FeedListenerConfig) -> Self {
        Self {
            node: normalize_url(node_url),
            url: feed_url(node_url, stream),
            decoder: FeedDecoder::new(stream, config.dedup_capacity),
            handler,
            config,
        }
    }

    /// Spawn the redundant connections. Each task ends on shutdown.
    pub fn spawn(self: Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        (0..self.config.connections.max(1))
            .map(|n| {
                let listener = Arc::clone(&self);
                let mut rx = shutdown.subscribe();
                tokio::spawn(async move {
                    let delay = listener.config.stagger * n as u32;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => listener.run(n, rx).await,
                        _ = rx.recv() => {}
                    }
                })
            })
            .collect()
    }

    async fn run(&self, connection: usize, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = self.config.backoff_initial;
        loop {
            match self.session(connection, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => return,
                Ok(SessionEnd::Closed) => {
                    tracing::warn!(url = %self.url, connection, "feed closed, reconnecting");
                    backoff = self.config.backoff_initial;
                }
                Err(e) => {
                    tracing::error!(url = %self.url, connection, error = %e, retry_in = ?backoff, "feed connection failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => return,
            }
            backoff = (backoff * 2).min(self.config.backoff_max);
        }
    }

    async fn session(
        &self,
        connection: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SessionEnd, NetworkError> {
        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let (mut socket, _) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| NetworkError::WebSocket(format!("connect to {} timed out", self.url)))?
            .map_err(|e| NetworkError::WebSocket(e.to_string()))?;
        tracing::info!(url = %self.url, connection, "connected to feed");

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.config.heartbeat, socket.next()) => next,
                _ = shutdown.recv() => {
                    let _ = socket.close(None).await;
                    return Ok(SessionEnd::Shutdown);
                }
            };
            let message = match next {
                Err(_) => {
                    tracing::error!(url = %self.url, connection, "feed heartbeat timed out");
                    return Ok(SessionEnd::Closed);
                }
                Ok(None) => return Ok(SessionEnd::Closed),
                Ok(Some(Err(e))) => return Err(NetworkError::WebSocket(e.to_string())),
                Ok(Some(Ok(message))) => message,
            };
            match message {
                Message::Text(text) => self.handle_frame(text.as_bytes()).await,
                Message::Binary(bytes) => self.handle_frame(&bytes).await,
                Message::Close(_) => return Ok(SessionEnd::Closed),
                // pings and pongs only refresh the heartbeat
                _ => {}
            }
        }
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let stream = self.decoder.stream();
        match self.decoder.accept(frame) {
            FrameOutcome::Accepted(message) => self.handler.on_message(&self.node, message).await,
            FrameOutcome::Duplicate => self.handler.on_duplicate(&self.node, stream),
            FrameOutcome::Malformed(e) => self.handler.on_malformed(&self.node, stream, &e),
        }
    }
}
