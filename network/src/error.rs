use thiserror::Error;
use whistle_crypto::CryptoError;
use whistle_protocol::{IndexError, ProtocolError, TransportError};
use whistle_store::StoreError;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Every candidate of a fallback request failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("unable to perform request {path} with {tried} candidates (last: {last})")]
    Exhausted { path: String, tried: usize, last: String },
}

/// Failures while producing a transaction's chunk sequence. These are
/// data-source failures: none of them says anything about the items inside.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("offset lookup failed: {0}")]
    Metadata(FetchError),

    #[error("malformed offset metadata: {0}")]
    MalformedMetadata(String),

    #[error("chunk at {offset} failed: {source}")]
    Chunk { offset: u64, source: FetchError },

    #[error("chunk at {offset} undecodable: {reason}")]
    ChunkDecode { offset: u64, reason: String },

    #[error("chunk at {offset} has {actual} bytes, expected {expected}")]
    ChunkSize { offset: u64, expected: u64, actual: u64 },

    #[error("got {received}B, expected {expected}B")]
    SizeMismatch { expected: u64, received: u64 },
}
