//! Discovery of bundles each watched bundler posted to the ledger.

use std::sync::Arc;

use whistle_network::peer_directory::normalize_url;
use whistle_network::{fetch_bundler_address, HeightCache};
use whistle_protocol::{ChainIndex, HttpTransport};
use whistle_store::WatchdogStore;
use whistle_types::params::SYNC_REWIND_BLOCKS;
use whistle_types::{BundleRecord, BundlerRecord, Clock};

use crate::NodeError;

const PAGE_SIZE: u32 = 100;

/// Resolve a bundler's posting address and store it. Returns the record and
/// whether it was new.
pub async fn register_bundler(
    store: &dyn WatchdogStore,
    transport: &dyn HttpTransport,
    url: &str,
) -> Result<(BundlerRecord, bool), NodeError> {
    let url = normalize_url(url);
    let address = fetch_bundler_address(transport, &url).await?;
    let record = BundlerRecord { url, address };
    let created = store.insert_bundler(&record)?;
    if created {
        tracing::info!(node = %record.url, address = %record.address, "registered bundler");
    } else {
        tracing::debug!(node = %record.url, "bundler already registered");
    }
    Ok((record, created))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub from_block: u64,
    /// Bundle-tagged transactions seen.
    pub posted: usize,
    /// Of those, rows not already stored.
    pub inserted: usize,
}

pub struct BundleSync {
    store: Arc<dyn WatchdogStore>,
    transport: Arc<dyn HttpTransport>,
    index: Arc<dyn ChainIndex>,
    height: Arc<HeightCache>,
    clock: Arc<dyn Clock>,
    start_height: Option<u64>,
}

impl BundleSync {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        transport: Arc<dyn HttpTransport>,
        index: Arc<dyn ChainIndex>,
        height: Arc<HeightCache>,
        clock: Arc<dyn Clock>,
        start_height: Option<u64>,
    ) -> Self {
        Self {
            store,
            transport,
            index,
            height,
            clock,
            start_height,
        }
    }

    /// Sync every known bundler. One failing bundler does not stop the rest.
    pub async fn sync_all(&self) -> Result<Vec<(String, SyncReport)>, NodeError> {
        let mut reports = Vec::new();
        for bundler in self.store.bundlers()? {
            match self.sync_bundler(&bundler).await {
                Ok(report) => reports.push((bundler.url, report)),
                Err(e) => tracing::error!(node = %bundler.url, error = %e, "bundle sync failed"),
            }
        }
        Ok(reports)
    }

    pub async fn sync_bundler(&self, bundler: &BundlerRecord) -> Result<SyncReport, NodeError> {
        let anchor = match self.store.latest_block_for_node(&bundler.url)? {
            Some(block) => block,
            None => match self.start_height {
                Some(height) => height,
                None => self.height.height().await?,
            },
        };
        let from_block = anchor.saturating_sub(SYNC_REWIND_BLOCKS);
        tracing::debug!(node = %bundler.url, from_block, "syncing posted bundles");

        let address = fetch_bundler_address(self.transport.as_ref(), &bundler.url).await?;
        if address != bundler.address {
            tracing::warn!(node = %bundler.url, stored = %bundler.address, current = %address, "bundler address changed");
        }

        let mut report = SyncReport {
            from_block,
            ..SyncReport::default()
        };
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .index
                .posted_bundles(&address, from_block, PAGE_SIZE, cursor.as_deref())
                .await?;
            let now = self.clock.now();
            for posted in page.bundles.iter().filter(|b| b.is_bundle()) {
                report.posted += 1;
                let record = BundleRecord::discovered(posted.id, posted.block, Some(bundler.url.clone()), now);
                if self.store.insert_bundle(&record)? {
                    report.inserted += 1;
                }
            }
            match page.next_cursor {
                Some(next) => {
                    if let Some(last) = page.bundles.last() {
                        tracing::debug!(node = %bundler.url, height = last.block, "paging posted bundles");
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        if report.inserted > 0 {
            tracing::info!(node = %bundler.url, posted = report.posted, new = report.inserted, "synced posted bundles");
        }
        Ok(report)
    }
}
