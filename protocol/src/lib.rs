//! Wire protocol: ledger node endpoints, JSON payloads, bundler feed messages,
//! and the transport and chain-index seams the rest of the workspace is
//! written against.

pub mod codec;
pub mod endpoints;
pub mod error;
pub mod feed;
pub mod graphql;
pub mod index;
pub mod node;
pub mod transport;

pub use error::ProtocolError;
pub use feed::{FeedMessage, FeedStream, SignedReceipt, StreamedTransaction};
pub use index::{ChainIndex, IndexError, PostedBundle, PostedBundlePage, TransactionInclusion};
pub use node::{ChunkResponse, NodeInfo, SyncRecord, TxOffset, TxStatus};
pub use transport::{HttpResponse, HttpTransport, TransportError};
