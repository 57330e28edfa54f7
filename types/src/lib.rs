//! Fundamental types for the bundler watchdog.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! identifiers, tri-state validity, persisted records, timestamps, alerts, and
//! protocol constants.

pub mod alert;
pub mod error;
pub mod id;
pub mod params;
pub mod records;
pub mod time;
pub mod validity;

pub use alert::{Alert, AlertCode, AlertKind, AlertSink};
pub use error::TypesError;
pub use id::TxId;
pub use records::{BundleRecord, BundlerRecord, PeerRecord, TransactionRecord};
pub use time::{Clock, SystemClock, Timestamp};
pub use validity::Validity;
