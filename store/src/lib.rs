//! Abstract storage traits for the watchdog.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits.
//!
//! All mutations are single-row and conditional (insert-or-ignore, increment,
//! update-if-unset) so concurrent verifications never need a process lock.

pub mod bundle;
pub mod bundler;
pub mod error;
pub mod peer;
pub mod transaction;

pub use bundle::BundleStore;
pub use bundler::BundlerStore;
pub use error::StoreError;
pub use peer::PeerStore;
pub use transaction::TransactionStore;

/// Everything the watchdog persists, behind one handle.
pub trait WatchdogStore: TransactionStore + BundleStore + PeerStore + BundlerStore + Send + Sync {}

impl<T> WatchdogStore for T where T: TransactionStore + BundleStore + PeerStore + BundlerStore + Send + Sync {}
