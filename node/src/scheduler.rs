//! Periodic jobs.
//!
//! Each job runs in its own loop and is awaited inline, so a job never
//! overlaps itself. Ticks missed while a run was in progress are skipped.
//! A failed run is logged and the loop carries on.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use whistle_network::{HeightCache, PeerCrawler};
use whistle_store::WatchdogStore;
use whistle_types::Clock;

use crate::bundle_sync::BundleSync;
use crate::invalid_sweep::InvalidSweep;
use crate::metrics::WatchdogMetrics;
use crate::orphan::OrphanResolver;
use crate::pool::{BatchReport, WorkerPool};
use crate::NodeError;

/// Backlog size that earns a warning.
const HIGH_BACKLOG: usize = 100;

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), NodeError>;
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<(Arc<dyn Job>, Duration)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, job: Arc<dyn Job>, every: Duration) {
        self.jobs.push((job, every));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Start every job loop. Each loop ends on shutdown, after any run in
    /// progress completes.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|(job, every)| {
                let rx = shutdown.subscribe();
                tokio::spawn(run_job(job, every, rx))
            })
            .collect()
    }
}

async fn run_job(job: Arc<dyn Job>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(job = job.name(), every = ?every, "job scheduled");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::debug!(job = job.name(), "job stopped");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = job.run().await {
                    tracing::error!(job = job.name(), error = %e, "job failed");
                }
            }
        }
    }
}

pub struct CrawlJob(pub Arc<PeerCrawler>);

#[async_trait]
impl Job for CrawlJob {
    fn name(&self) -> &'static str {
        "crawl-peers"
    }

    async fn run(&self) -> Result<(), NodeError> {
        let report = self.0.crawl().await?;
        tracing::debug!(visited = report.visited, added = report.added, "peer crawl finished");
        Ok(())
    }
}

pub struct SyncJob(pub Arc<BundleSync>);

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &'static str {
        "sync-bundles"
    }

    async fn run(&self) -> Result<(), NodeError> {
        self.0.sync_all().await?;
        Ok(())
    }
}

pub struct OrphanJob(pub Arc<OrphanResolver>);

#[async_trait]
impl Job for OrphanJob {
    fn name(&self) -> &'static str {
        "resolve-orphans"
    }

    async fn run(&self) -> Result<(), NodeError> {
        let report = self.0.run().await?;
        if !report.outcomes.is_empty() {
            tracing::info!(orphans = report.outcomes.len(), linked = report.linked(), "orphan resolution finished");
        }
        Ok(())
    }
}

pub struct SweepJob(pub Arc<InvalidSweep>);

#[async_trait]
impl Job for SweepJob {
    fn name(&self) -> &'static str {
        "invalid-sweep"
    }

    async fn run(&self) -> Result<(), NodeError> {
        let report = self.0.run().await?;
        if report.escalated() > 0 {
            tracing::warn!(escalated = report.escalated(), "escalated expired transactions");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct VerifyJobConfig {
    pub confirmation_threshold: u64,
    pub min_retry_interval_secs: u64,
    pub batch_limit: usize,
}

/// Picks the bundles due for an attempt and hands them to the pool.
pub struct VerifyJob {
    store: Arc<dyn WatchdogStore>,
    pool: Arc<WorkerPool>,
    height: Arc<HeightCache>,
    clock: Arc<dyn Clock>,
    metrics: Arc<WatchdogMetrics>,
    config: VerifyJobConfig,
}

impl VerifyJob {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        pool: Arc<WorkerPool>,
        height: Arc<HeightCache>,
        clock: Arc<dyn Clock>,
        metrics: Arc<WatchdogMetrics>,
        config: VerifyJobConfig,
    ) -> Self {
        Self {
            store,
            pool,
            height,
            clock,
            metrics,
            config,
        }
    }

    pub async fn verify_due(&self) -> Result<BatchReport, NodeError> {
        let height = self.height.height().await?;
        let max_block = height.saturating_sub(self.config.confirmation_threshold);
        let cutoff = self.clock.now().minus_secs(self.config.min_retry_interval_secs);
        let due = self
            .store
            .bundles_due_for_verification(max_block, cutoff, self.config.batch_limit)?;

        self.metrics.verification_backlog.set(due.len() as i64);
        if due.len() >= HIGH_BACKLOG {
            tracing::warn!(backlog = due.len(), "high verification backlog");
        }
        if due.is_empty() {
            return Ok(BatchReport::default());
        }
        tracing::debug!(bundles = due.len(), max_block, "verifying due bundles");

        let report = self.pool.run_batch(due.into_iter().map(|b| b.id).collect()).await;
        tracing::info!(
            decided = report.decided(),
            valid = report.count("valid"),
            invalid = report.count("invalid"),
            retrying = report.count("rejected") + report.count("inconclusive") + report.count("unconfirmed"),
            failed = report.errors.len(),
            crashed = report.crashed,
            "verification batch finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl Job for VerifyJob {
    fn name(&self) -> &'static str {
        "verify-bundles"
    }

    async fn run(&self) -> Result<(), NodeError> {
        self.verify_due().await.map(|_| ())
    }
}
