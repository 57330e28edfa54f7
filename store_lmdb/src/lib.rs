//! LMDB storage backend for the watchdog.
//!
//! Implements all storage traits from `whistle-store` on a single
//! [`LmdbEnvironment`] using the `heed` LMDB bindings. Every conditional update
//! runs inside one write transaction; LMDB serializes writers, so each
//! read-modify-write is atomic with respect to concurrent verifications.

pub mod bundle;
pub mod bundler;
pub mod environment;
pub mod error;
pub mod integrity;
pub mod peer;
pub mod transaction;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use integrity::{check_data_dir, check_integrity, IntegrityReport};
