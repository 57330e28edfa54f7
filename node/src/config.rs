//! Watchdog configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use whistle_network::{FeedListenerConfig, FetcherConfig, PeerDirectoryConfig, RetryPolicy};
use whistle_types::params::{DEFAULT_PENALTY, MIN_PEER_RELEASE, STARTING_TRUST};

use crate::engine::EngineConfig;
use crate::NodeError;

/// Configuration for the watchdog.
///
/// Can be loaded from a TOML file via [`WatchdogConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field has a default.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Directory holding the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Canonical gateway, the last resort of every fallback request.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Height to start the posted-bundle sync from for a bundler with no
    /// known bundles. The network height is used when unset.
    #[serde(default)]
    pub start_height: Option<u64>,

    /// Bundler URLs registered on startup.
    #[serde(default)]
    pub bundlers: Vec<String>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // ── Verification ──
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u64,
    #[serde(default = "default_max_verify_attempts")]
    pub max_verify_attempts: u32,
    #[serde(default = "default_min_retry_interval_secs")]
    pub min_retry_interval_secs: u64,
    #[serde(default = "default_bundle_verify_concurrency")]
    pub bundle_verify_concurrency: usize,
    /// Bundles taken per verification run.
    #[serde(default = "default_verify_batch_limit")]
    pub verify_batch_limit: usize,
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,
    #[serde(default = "default_minimum_full_replicas")]
    pub minimum_full_replicas: usize,
    /// Count full replicas after an inconclusive attempt.
    #[serde(default)]
    pub probe_replicas_on_failure: bool,

    // ── Requests ──
    #[serde(default = "default_fallback_peer_count")]
    pub fallback_peer_count: usize,
    #[serde(default = "default_peer_request_retries")]
    pub peer_request_retries: u32,
    #[serde(default = "default_peer_request_timeout_secs")]
    pub peer_request_timeout_secs: u64,
    #[serde(default = "default_gateway_request_retries")]
    pub gateway_request_retries: u32,

    // ── Escalation ──
    #[serde(default = "default_orphan_lookahead_blocks")]
    pub orphan_lookahead_blocks: u64,
    #[serde(default = "default_orphan_concurrency")]
    pub orphan_concurrency: usize,
    /// Blocks after first sight by which a streamed item must be resolved.
    #[serde(default = "default_tx_deadline_offset")]
    pub tx_deadline_offset: u64,
    #[serde(default = "default_height_cache_secs")]
    pub height_cache_secs: u64,

    // ── Feeds ──
    #[serde(default = "default_feed_dedup_capacity")]
    pub feed_dedup_capacity: usize,
    #[serde(default = "default_feed_heartbeat_secs")]
    pub feed_heartbeat_secs: u64,

    // ── Peers ──
    #[serde(default = "default_max_peer_depth")]
    pub max_peer_depth: u32,
    #[serde(default = "default_min_peer_release")]
    pub min_peer_release: u64,
    #[serde(default = "default_starting_trust")]
    pub starting_trust: f64,
    #[serde(default = "default_penalty")]
    pub penalty: f64,
    /// Share of a randomized peer selection drawn from below the top scores.
    #[serde(default = "default_peer_exploration_ratio")]
    pub peer_exploration_ratio: f64,

    // ── Job intervals ──
    #[serde(default = "default_crawl_interval_secs")]
    pub crawl_interval_secs: u64,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_verify_interval_secs")]
    pub verify_interval_secs: u64,
    #[serde(default = "default_orphan_interval_secs")]
    pub orphan_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Serve `/metrics` and `/health` on this port when set.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_lmdb_map_size")]
    pub lmdb_map_size: usize,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./whistle_data")
}

fn default_gateway_url() -> String {
    "https://arweave.net".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_confirmation_threshold() -> u64 {
    50
}

fn default_max_verify_attempts() -> u32 {
    3
}

fn default_min_retry_interval_secs() -> u64 {
    300
}

fn default_bundle_verify_concurrency() -> usize {
    4
}

fn default_verify_batch_limit() -> usize {
    500
}

fn default_chunk_concurrency() -> usize {
    100
}

fn default_minimum_full_replicas() -> usize {
    5
}

fn default_fallback_peer_count() -> usize {
    20
}

fn default_peer_request_retries() -> u32 {
    1
}

fn default_peer_request_timeout_secs() -> u64 {
    10
}

fn default_gateway_request_retries() -> u32 {
    3
}

fn default_orphan_lookahead_blocks() -> u64 {
    20
}

fn default_orphan_concurrency() -> usize {
    10
}

fn default_tx_deadline_offset() -> u64 {
    200
}

fn default_height_cache_secs() -> u64 {
    10
}

fn default_feed_dedup_capacity() -> usize {
    5
}

fn default_feed_heartbeat_secs() -> u64 {
    35
}

fn default_max_peer_depth() -> u32 {
    2
}

fn default_min_peer_release() -> u64 {
    MIN_PEER_RELEASE
}

fn default_starting_trust() -> f64 {
    STARTING_TRUST
}

fn default_penalty() -> f64 {
    DEFAULT_PENALTY
}

fn default_peer_exploration_ratio() -> f64 {
    0.25
}

fn default_crawl_interval_secs() -> u64 {
    30
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_verify_interval_secs() -> u64 {
    15
}

fn default_orphan_interval_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_lmdb_map_size() -> usize {
    1 << 30
}

// ── Impl ───────────────────────────────────────────────────────────────

impl WatchdogConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn peer_directory_config(&self) -> PeerDirectoryConfig {
        let mut config = PeerDirectoryConfig::new(&self.gateway_url);
        config.exploration_ratio = self.peer_exploration_ratio;
        config.starting_trust = self.starting_trust;
        config.penalty = self.penalty;
        config.min_release = self.min_peer_release;
        config
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        let mut config = FetcherConfig::new(&self.gateway_url);
        config.fallback_peer_count = self.fallback_peer_count;
        config.peer_policy = RetryPolicy::new(
            self.peer_request_retries,
            Duration::from_secs(self.peer_request_timeout_secs),
        );
        config
    }

    pub fn listener_config(&self) -> FeedListenerConfig {
        FeedListenerConfig {
            heartbeat: Duration::from_secs(self.feed_heartbeat_secs),
            dedup_capacity: self.feed_dedup_capacity,
            ..FeedListenerConfig::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            confirmation_threshold: self.confirmation_threshold,
            max_attempts: self.max_verify_attempts,
            minimum_full_replicas: self.minimum_full_replicas,
            probe_replicas_on_failure: self.probe_replicas_on_failure,
            gateway_retries: self.gateway_request_retries,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            gateway_url: default_gateway_url(),
            start_height: None,
            bundlers: Vec::new(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            confirmation_threshold: default_confirmation_threshold(),
            max_verify_attempts: default_max_verify_attempts(),
            min_retry_interval_secs: default_min_retry_interval_secs(),
            bundle_verify_concurrency: default_bundle_verify_concurrency(),
            verify_batch_limit: default_verify_batch_limit(),
            chunk_concurrency: default_chunk_concurrency(),
            minimum_full_replicas: default_minimum_full_replicas(),
            probe_replicas_on_failure: false,
            fallback_peer_count: default_fallback_peer_count(),
            peer_request_retries: default_peer_request_retries(),
            peer_request_timeout_secs: default_peer_request_timeout_secs(),
            gateway_request_retries: default_gateway_request_retries(),
            orphan_lookahead_blocks: default_orphan_lookahead_blocks(),
            orphan_concurrency: default_orphan_concurrency(),
            tx_deadline_offset: default_tx_deadline_offset(),
            height_cache_secs: default_height_cache_secs(),
            feed_dedup_capacity: default_feed_dedup_capacity(),
            feed_heartbeat_secs: default_feed_heartbeat_secs(),
            max_peer_depth: default_max_peer_depth(),
            min_peer_release: default_min_peer_release(),
            starting_trust: default_starting_trust(),
            penalty: default_penalty(),
            peer_exploration_ratio: default_peer_exploration_ratio(),
            crawl_interval_secs: default_crawl_interval_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            verify_interval_secs: default_verify_interval_secs(),
            orphan_interval_secs: default_orphan_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            metrics_port: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            lmdb_map_size: default_lmdb_map_size(),
        }
    }
}
