//! The bundler watchdog.
//!
//! Ties the storage, network and parser crates together:
//! - verifies posted bundles item by item ([`engine`]) through a bounded,
//!   crash-isolating worker pool ([`pool`])
//! - links orphaned transactions to their parent bundles ([`orphan`])
//! - escalates transactions whose deadline passed unresolved ([`invalid_sweep`])
//! - discovers posted bundles ([`bundle_sync`]) and stores feed traffic ([`ingest`])
//! - runs all of it on a schedule under one supervisor ([`node::Watchdog`])

pub mod alert;
pub mod bundle_sync;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod invalid_sweep;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod node;
pub mod orphan;
pub mod pool;
pub mod scheduler;
pub mod shutdown;

pub use alert::AlertDispatcher;
pub use bundle_sync::{register_bundler, BundleSync, SyncReport};
pub use config::WatchdogConfig;
pub use engine::{AttemptOutcome, EngineConfig, VerificationEngine};
pub use error::NodeError;
pub use ingest::FeedIngest;
pub use invalid_sweep::{InvalidSweep, SweepOutcome, SweepReport};
pub use logging::{init_logging, LogFormat};
pub use metrics::WatchdogMetrics;
pub use node::{open_store, Dependencies, Watchdog};
pub use orphan::{OrphanOutcome, OrphanReport, OrphanResolver};
pub use pool::{BatchReport, BundleVerifier, WorkerPool};
pub use scheduler::{Job, Scheduler, VerifyJob, VerifyJobConfig};
pub use shutdown::ShutdownController;
