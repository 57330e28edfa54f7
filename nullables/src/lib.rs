//! Nullable infrastructure for deterministic testing.
//!
//! All external dependencies (clock, HTTP, chain index, storage, alert
//! delivery) are abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be scripted and inspected programmatically
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod alert;
pub mod chain_index;
pub mod clock;
pub mod fixtures;
pub mod network;
pub mod store;

pub use alert::RecordingAlertSink;
pub use chain_index::NullChainIndex;
pub use clock::NullClock;
pub use fixtures::{build_bundle, TestItem};
pub use network::{Method, NullNetwork, RecordedRequest, Reply};
pub use store::NullStore;
