//! Orphan resolution.
//!
//! Transactions still without a parent bundle as their deadline nears are
//! looked up in the chain index. A found parent is recorded as a bundle
//! (attributed to its bundler when the owner address is known) and linked,
//! so the verifier picks it up.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

use whistle_network::HeightCache;
use whistle_protocol::ChainIndex;
use whistle_store::WatchdogStore;
use whistle_types::{BundleRecord, Clock, TransactionRecord, TxId};

use crate::NodeError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrphanOutcome {
    /// Parent found and linked. `new_bundle` is false if the bundle row
    /// already existed.
    Linked {
        bundle: TxId,
        new_bundle: bool,
        from_node: Option<String>,
    },
    /// Not in a block yet, or no parent known yet. Left for the next run.
    Pending,
    /// The index does not know the transaction.
    NotIndexed,
    /// The parent's owner address could not be resolved. Left untouched.
    OwnerUnresolved { bundle: TxId },
    /// Index or store failure.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct OrphanReport {
    pub height: u64,
    pub outcomes: Vec<(TxId, OrphanOutcome)>,
}

impl OrphanReport {
    pub fn linked(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, OrphanOutcome::Linked { .. }))
            .count()
    }

    pub fn outcome(&self, id: &TxId) -> Option<&OrphanOutcome> {
        self.outcomes.iter().find(|(t, _)| t == id).map(|(_, o)| o)
    }
}

pub struct OrphanResolver {
    store: Arc<dyn WatchdogStore>,
    index: Arc<dyn ChainIndex>,
    height: Arc<HeightCache>,
    clock: Arc<dyn Clock>,
    lookahead: u64,
    concurrency: usize,
}

impl OrphanResolver {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        index: Arc<dyn ChainIndex>,
        height: Arc<HeightCache>,
        clock: Arc<dyn Clock>,
        lookahead: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            index,
            height,
            clock,
            lookahead,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self) -> Result<OrphanReport, NodeError> {
        let height = self.height.height().await?;
        self.resolve_due(height).await
    }

    /// Resolve every orphan whose deadline is within the lookahead of `height`.
    pub async fn resolve_due(&self, height: u64) -> Result<OrphanReport, NodeError> {
        let orphans = self.store.orphans_due(height.saturating_add(self.lookahead))?;
        if orphans.is_empty() {
            return Ok(OrphanReport {
                height,
                outcomes: Vec::new(),
            });
        }
        tracing::warn!(count = orphans.len(), height, "resolving orphan transactions");

        let outcomes = stream::iter(orphans)
            .map(|orphan| async move {
                let outcome = match self.resolve(&orphan).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(tx = %orphan.id, error = %e, "orphan lookup failed");
                        OrphanOutcome::Failed(e.to_string())
                    }
                };
                (orphan.id, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        Ok(OrphanReport { height, outcomes })
    }

    async fn resolve(&self, orphan: &TransactionRecord) -> Result<OrphanOutcome, NodeError> {
        let Some(inclusion) = self.index.transaction_inclusion(&orphan.id).await? else {
            tracing::debug!(tx = %orphan.id, "orphan not indexed yet");
            return Ok(OrphanOutcome::NotIndexed);
        };
        let Some(block) = inclusion.block_height else {
            tracing::debug!(tx = %orphan.id, "orphan has no block yet, delaying");
            return Ok(OrphanOutcome::Pending);
        };
        let Some(bundle) = inclusion.bundled_in else {
            return Ok(OrphanOutcome::Pending);
        };

        let Some(owner) = self.index.owner_address(&bundle).await? else {
            tracing::error!(tx = %orphan.id, bundle = %bundle, "unable to determine owner of parent bundle");
            return Ok(OrphanOutcome::OwnerUnresolved { bundle });
        };
        let from_node = self.store.bundler_by_address(&owner)?.map(|b| b.url);
        match &from_node {
            Some(url) => tracing::warn!(tx = %orphan.id, bundle = %bundle, node = %url, "unexpected orphan transaction"),
            None => tracing::warn!(
                tx = %orphan.id,
                bundle = %bundle,
                owner = %owner,
                "parent bundle posted by an unknown bundler"
            ),
        }

        let record = BundleRecord::discovered(bundle, block, from_node.clone(), self.clock.now());
        let new_bundle = self.store.insert_bundle(&record)?;
        self.store.set_transaction_parent(&orphan.id, &bundle)?;
        Ok(OrphanOutcome::Linked {
            bundle,
            new_bundle,
            from_node,
        })
    }
}
