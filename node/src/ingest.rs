//! Storing what the bundler feeds announce.

use async_trait::async_trait;
use std::sync::Arc;

use whistle_network::{FeedHandler, HeightCache};
use whistle_protocol::{FeedMessage, FeedStream, SignedReceipt, StreamedTransaction};
use whistle_store::WatchdogStore;
use whistle_types::{Clock, TransactionRecord};

use crate::metrics::WatchdogMetrics;
use crate::NodeError;

pub struct FeedIngest {
    store: Arc<dyn WatchdogStore>,
    height: Arc<HeightCache>,
    clock: Arc<dyn Clock>,
    metrics: Arc<WatchdogMetrics>,
    deadline_offset: u64,
}

impl FeedIngest {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        height: Arc<HeightCache>,
        clock: Arc<dyn Clock>,
        metrics: Arc<WatchdogMetrics>,
        deadline_offset: u64,
    ) -> Self {
        Self {
            store,
            height,
            clock,
            metrics,
            deadline_offset,
        }
    }

    /// Record a streamed transaction. Nested items (with a parent) are
    /// verified as part of their parent and skipped. Returns whether a row
    /// was created.
    pub async fn ingest_transaction(&self, tx: &StreamedTransaction) -> Result<bool, NodeError> {
        if tx.parent.is_some() {
            return Ok(false);
        }
        let height = self.height.height().await?;
        let record = TransactionRecord::observed(tx.id, height + self.deadline_offset, self.clock.now());
        Ok(self.store.insert_transaction(&record)?)
    }

    /// Record a receipt's deadline, creating the row if needed.
    pub fn ingest_receipt(&self, receipt: &SignedReceipt) -> Result<(), NodeError> {
        self.store
            .upsert_receipt(&receipt.id, receipt.deadline_height, self.clock.now())?;
        Ok(())
    }
}

#[async_trait]
impl FeedHandler for FeedIngest {
    async fn on_message(&self, node: &str, message: FeedMessage) {
        self.metrics.feed_messages.inc();
        let result = match &message {
            FeedMessage::Transaction(tx) => self.ingest_transaction(tx).await.map(|_| ()),
            FeedMessage::Receipt(receipt) => self.ingest_receipt(receipt),
        };
        if let Err(e) = result {
            tracing::error!(node, tx = %message.id(), error = %e, "failed to store feed message");
        }
    }

    fn on_duplicate(&self, _node: &str, _stream: FeedStream) {
        self.metrics.feed_duplicates.inc();
    }
}
