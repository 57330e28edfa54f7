//! Ledger networking for the watchdog.
//!
//! Peer trust scoring and selection, fallback requests across peers with the
//! gateway as last resort, ordered chunked downloads of base-layer
//! transactions, the gateway GraphQL index, a cached network height, peer
//! crawling, replica probing, and the bundler real-time feed listener.

pub mod bundler;
pub mod chunks;
pub mod crawler;
pub mod dedup;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod height;
pub mod http;
pub mod listener;
pub mod peer_directory;
pub mod replicas;
pub mod request;

pub use bundler::fetch_bundler_address;
pub use chunks::{ChunkDownloader, ChunkStream};
pub use crawler::{CrawlReport, PeerCrawler};
pub use dedup::RecentMessages;
pub use error::{DownloadError, FetchError, NetworkError};
pub use fallback::{FallbackFetcher, FeedbackMode, FetcherConfig, RequestOptions};
pub use gateway::GatewayIndex;
pub use height::HeightCache;
pub use http::ReqwestTransport;
pub use listener::{FeedDecoder, FeedHandler, FeedListener, FeedListenerConfig, FrameOutcome};
pub use peer_directory::{PeerDirectory, PeerDirectoryConfig};
pub use replicas::ReplicaProbe;
pub use request::{get_with_retry, AttemptFailure, RetryPolicy};
