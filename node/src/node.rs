//! The watchdog supervisor.
//!
//! [`Watchdog`] owns every component, starts the feed listeners and the
//! periodic jobs, and drains them on shutdown within a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use whistle_network::{
    ChunkDownloader, FallbackFetcher, FeedHandler, FeedListener, GatewayIndex, HeightCache, PeerCrawler,
    PeerDirectory, ReplicaProbe, ReqwestTransport,
};
use whistle_protocol::{ChainIndex, FeedStream, HttpTransport};
use whistle_store::WatchdogStore;
use whistle_store_lmdb::{check_data_dir, check_integrity, LmdbEnvironment};
use whistle_types::{AlertSink, BundlerRecord, Clock, SystemClock};

use crate::alert::AlertDispatcher;
use crate::bundle_sync::{register_bundler, BundleSync};
use crate::config::WatchdogConfig;
use crate::engine::VerificationEngine;
use crate::ingest::FeedIngest;
use crate::invalid_sweep::InvalidSweep;
use crate::metrics::WatchdogMetrics;
use crate::orphan::OrphanResolver;
use crate::pool::WorkerPool;
use crate::scheduler::{CrawlJob, OrphanJob, Scheduler, SweepJob, SyncJob, VerifyJob, VerifyJobConfig};
use crate::shutdown::ShutdownController;
use crate::{metrics_server, NodeError};

/// External collaborators, injected so tests can substitute fakes.
pub struct Dependencies {
    pub store: Arc<dyn WatchdogStore>,
    pub transport: Arc<dyn HttpTransport>,
    pub index: Arc<dyn ChainIndex>,
    pub clock: Arc<dyn Clock>,
    pub alerts: Arc<dyn AlertSink>,
}

pub struct Watchdog {
    config: WatchdogConfig,
    store: Arc<dyn WatchdogStore>,
    transport: Arc<dyn HttpTransport>,
    metrics: Arc<WatchdogMetrics>,
    height: Arc<HeightCache>,
    crawler: Arc<PeerCrawler>,
    sync: Arc<BundleSync>,
    engine: Arc<VerificationEngine>,
    verify_job: Arc<VerifyJob>,
    orphans: Arc<OrphanResolver>,
    sweep: Arc<InvalidSweep>,
    ingest: Arc<FeedIngest>,
    shutdown: ShutdownController,
    tasks: Vec<JoinHandle<()>>,
}

impl Watchdog {
    /// Wire every component over the given collaborators.
    pub fn new(config: WatchdogConfig, deps: Dependencies) -> Result<Self, NodeError> {
        let Dependencies {
            store,
            transport,
            index,
            clock,
            alerts,
        } = deps;
        let metrics = Arc::new(WatchdogMetrics::new()?);
        let dispatcher = AlertDispatcher::new(alerts, Arc::clone(&metrics));

        let directory = Arc::new(PeerDirectory::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.peer_directory_config(),
        ));
        let fetcher = Arc::new(FallbackFetcher::new(
            Arc::clone(&directory),
            Arc::clone(&transport),
            config.fetcher_config(),
        ));
        let downloader = ChunkDownloader::new(Arc::clone(&fetcher), config.chunk_concurrency);
        let height = Arc::new(HeightCache::new(
            Arc::clone(&transport),
            Arc::clone(&clock),
            &config.gateway_url,
            config.height_cache_secs,
        ));
        let crawler = Arc::new(PeerCrawler::new(
            Arc::clone(&directory),
            Arc::clone(&transport),
            config.max_peer_depth,
        ));
        let replicas = Arc::new(ReplicaProbe::new(Arc::clone(&store), Arc::clone(&transport)));

        let engine = Arc::new(
            VerificationEngine::new(
                Arc::clone(&store),
                fetcher,
                downloader,
                Arc::clone(&clock),
                dispatcher.clone(),
                Arc::clone(&metrics),
                config.engine_config(),
            )
            .with_replica_probe(replicas),
        );
        let pool = Arc::new(WorkerPool::new(
            engine.clone(),
            config.bundle_verify_concurrency,
            Arc::clone(&metrics),
        ));
        let verify_job = Arc::new(VerifyJob::new(
            Arc::clone(&store),
            pool,
            Arc::clone(&height),
            Arc::clone(&clock),
            Arc::clone(&metrics),
            VerifyJobConfig {
                confirmation_threshold: config.confirmation_threshold,
                min_retry_interval_secs: config.min_retry_interval_secs,
                batch_limit: config.verify_batch_limit,
            },
        ));
        let sync = Arc::new(BundleSync::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&index),
            Arc::clone(&height),
            Arc::clone(&clock),
            config.start_height,
        ));
        let orphans = Arc::new(OrphanResolver::new(
            Arc::clone(&store),
            index,
            Arc::clone(&height),
            Arc::clone(&clock),
            config.orphan_lookahead_blocks,
            config.orphan_concurrency,
        ));
        let sweep = Arc::new(InvalidSweep::new(
            Arc::clone(&store),
            Arc::clone(&height),
            Arc::clone(&clock),
            dispatcher,
        ));
        let ingest = Arc::new(FeedIngest::new(
            Arc::clone(&store),
            Arc::clone(&height),
            clock,
            Arc::clone(&metrics),
            config.tx_deadline_offset,
        ));

        Ok(Self {
            config,
            store,
            transport,
            metrics,
            height,
            crawler,
            sync,
            engine,
            verify_job,
            orphans,
            sweep,
            ingest,
            shutdown: ShutdownController::new(),
            tasks: Vec::new(),
        })
    }

    /// Open the LMDB store in `data_dir` and wire the production transport,
    /// gateway index and system clock.
    pub fn open(config: WatchdogConfig, alerts: Arc<dyn AlertSink>) -> Result<Self, NodeError> {
        let store = open_store(&config)?;
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        let index = Arc::new(GatewayIndex::new(
            Arc::clone(&transport),
            &config.gateway_url,
            config.gateway_request_retries,
        ));
        Self::new(
            config,
            Dependencies {
                store,
                transport,
                index,
                clock: Arc::new(SystemClock),
                alerts,
            },
        )
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WatchdogStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<WatchdogMetrics> {
        &self.metrics
    }

    pub fn height(&self) -> &Arc<HeightCache> {
        &self.height
    }

    pub fn crawler(&self) -> &Arc<PeerCrawler> {
        &self.crawler
    }

    pub fn bundle_sync(&self) -> &Arc<BundleSync> {
        &self.sync
    }

    pub fn engine(&self) -> &Arc<VerificationEngine> {
        &self.engine
    }

    pub fn verify_job(&self) -> &Arc<VerifyJob> {
        &self.verify_job
    }

    pub fn orphans(&self) -> &Arc<OrphanResolver> {
        &self.orphans
    }

    pub fn sweep(&self) -> &Arc<InvalidSweep> {
        &self.sweep
    }

    pub fn ingest(&self) -> &Arc<FeedIngest> {
        &self.ingest
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Register a bundler by URL.
    pub async fn add_bundler(&self, url: &str) -> Result<(BundlerRecord, bool), NodeError> {
        register_bundler(self.store.as_ref(), self.transport.as_ref(), url).await
    }

    /// Register the bundlers named in the configuration. Failures are logged.
    pub async fn register_configured_bundlers(&self) {
        for url in &self.config.bundlers {
            if let Err(e) = self.add_bundler(url).await {
                tracing::error!(node = %url, error = %e, "failed to register bundler");
            }
        }
    }

    /// Start the feed listeners, the periodic jobs and the metrics server.
    pub fn start(&mut self) -> Result<(), NodeError> {
        let sender = self.shutdown.sender().clone();

        let bundlers = self.store.bundlers()?;
        if bundlers.is_empty() {
            tracing::warn!("no bundlers registered, nothing to listen to");
        }
        let handler: Arc<dyn FeedHandler> = self.ingest.clone();
        for bundler in &bundlers {
            for stream in [FeedStream::Transactions, FeedStream::Receipts] {
                let listener = Arc::new(FeedListener::new(
                    &bundler.url,
                    stream,
                    Arc::clone(&handler),
                    self.config.listener_config(),
                ));
                self.tasks.extend(listener.spawn(&sender));
            }
        }

        let secs = Duration::from_secs;
        let mut scheduler = Scheduler::new();
        scheduler.add(Arc::new(CrawlJob(Arc::clone(&self.crawler))), secs(self.config.crawl_interval_secs));
        scheduler.add(Arc::new(SyncJob(Arc::clone(&self.sync))), secs(self.config.sync_interval_secs));
        scheduler.add(self.verify_job.clone(), secs(self.config.verify_interval_secs));
        scheduler.add(Arc::new(OrphanJob(Arc::clone(&self.orphans))), secs(self.config.orphan_interval_secs));
        scheduler.add(Arc::new(SweepJob(Arc::clone(&self.sweep))), secs(self.config.sweep_interval_secs));
        self.tasks.extend(scheduler.spawn(&sender));

        if let Some(port) = self.config.metrics_port {
            let metrics = Arc::clone(&self.metrics);
            let rx = self.shutdown.subscribe();
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = metrics_server::serve(port, metrics, rx).await {
                    tracing::error!(port, error = %e, "metrics server failed");
                }
            }));
        }

        tracing::info!(
            bundlers = bundlers.len(),
            tasks = self.tasks.len(),
            gateway = %self.config.gateway_url,
            "watchdog started"
        );
        Ok(())
    }

    /// Signal shutdown and wait for every task, at most `shutdown_grace_secs`.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        self.shutdown.shutdown();
        let tasks = std::mem::take(&mut self.tasks);
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drain = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "task ended abnormally");
                }
            }
        };
        match tokio::time::timeout(grace, drain).await {
            Ok(()) => {
                tracing::info!("watchdog stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(grace = ?grace, "tasks still running after grace period");
                Err(NodeError::ShutdownTimeout)
            }
        }
    }

    /// Start, run until SIGINT/SIGTERM, then stop.
    pub async fn run_until_signal(mut self) -> Result<(), NodeError> {
        self.register_configured_bundlers().await;
        self.start()?;
        self.shutdown.wait_for_signal().await;
        self.stop().await
    }
}

/// Open (or create) the LMDB store, checking an existing one first.
pub fn open_store(config: &WatchdogConfig) -> Result<Arc<dyn WatchdogStore>, NodeError> {
    if let Err(e) = check_data_dir(&config.data_dir) {
        tracing::warn!(error = %e, "data directory check failed");
    }
    let env = LmdbEnvironment::open(&config.data_dir, config.lmdb_map_size)?;
    let report = check_integrity(env.env())?;
    if !report.is_healthy() {
        for error in &report.errors {
            tracing::error!(%error, "integrity check");
        }
        return Err(NodeError::Config(format!(
            "store at {} failed its integrity check",
            config.data_dir.display()
        )));
    }
    tracing::debug!(
        databases = report.databases_checked,
        entries = report.total_entries,
        "store integrity ok"
    );
    Ok(Arc::new(env))
}
