//! Deadline escalation for transactions that were never proven valid.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use whistle_network::HeightCache;
use whistle_store::WatchdogStore;
use whistle_types::{Alert, AlertCode, BundleRecord, Clock, TransactionRecord, TxId, Validity};

use crate::alert::AlertDispatcher;
use crate::NodeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Marked Invalid and alerted.
    Escalated(AlertCode),
    /// Parent bundle not verified yet.
    Waiting,
    /// Parent bundle is Valid yet the transaction is not. Logged.
    Unhandled,
    /// Someone else escalated it first.
    AlreadyFinal,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub height: u64,
    pub outcomes: Vec<(TxId, SweepOutcome)>,
}

impl SweepReport {
    pub fn escalated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SweepOutcome::Escalated(_)))
            .count()
    }

    pub fn outcome(&self, id: &TxId) -> Option<SweepOutcome> {
        self.outcomes.iter().find(|(t, _)| t == id).map(|(_, o)| *o)
    }
}

pub struct InvalidSweep {
    store: Arc<dyn WatchdogStore>,
    height: Arc<HeightCache>,
    clock: Arc<dyn Clock>,
    alerts: AlertDispatcher,
}

impl InvalidSweep {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        height: Arc<HeightCache>,
        clock: Arc<dyn Clock>,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            store,
            height,
            clock,
            alerts,
        }
    }

    pub async fn run(&self) -> Result<SweepReport, NodeError> {
        let height = self.height.height().await?;
        self.sweep(height).await
    }

    /// Handle every transaction whose deadline is below `height`.
    pub async fn sweep(&self, height: u64) -> Result<SweepReport, NodeError> {
        let expired = self.store.expired_unresolved(height)?;
        let mut parents: HashMap<TxId, Option<BundleRecord>> = HashMap::new();
        let mut report = SweepReport {
            height,
            outcomes: Vec::with_capacity(expired.len()),
        };

        for tx in expired {
            let outcome = match tx.bundled_in {
                None => {
                    self.escalate(
                        &tx,
                        None,
                        AlertCode::UnableToLocateParentBundle,
                        "orphan transaction - unable to locate parent bundle",
                    )
                    .await?
                }
                Some(parent) => {
                    if !parents.contains_key(&parent) {
                        parents.insert(parent, self.store.get_bundle(&parent)?);
                    }
                    match parents.get(&parent).and_then(Option::as_ref) {
                        None => {
                            tracing::error!(tx = %tx.id, bundle = %parent, "unable to find parent bundle");
                            self.escalate(
                                &tx,
                                None,
                                AlertCode::UnableToLocateParentBundle,
                                "unable to locate parent bundle, unable to verify item",
                            )
                            .await?
                        }
                        Some(bundle) => match bundle.validity {
                            Validity::Unknown => SweepOutcome::Waiting,
                            Validity::Invalid => {
                                self.escalate(
                                    &tx,
                                    Some(bundle),
                                    AlertCode::InvalidParentBundle,
                                    "parent bundle invalid, unable to verify item",
                                )
                                .await?
                            }
                            Validity::Valid => {
                                tracing::error!(
                                    tx = %tx.id,
                                    bundle = %parent,
                                    validity = %tx.validity,
                                    "unhandled case: parent bundle valid but transaction is not"
                                );
                                SweepOutcome::Unhandled
                            }
                        },
                    }
                }
            };
            report.outcomes.push((tx.id, outcome));
        }
        Ok(report)
    }

    async fn escalate(
        &self,
        tx: &TransactionRecord,
        bundle: Option<&BundleRecord>,
        code: AlertCode,
        reason: &str,
    ) -> Result<SweepOutcome, NodeError> {
        if !self.store.finalize_invalid_transaction(&tx.id, self.clock.now())? {
            return Ok(SweepOutcome::AlreadyFinal);
        }
        let info = json!({
            "id": tx.id.to_string(),
            "bundledIn": tx.bundled_in.map(|b| b.to_string()),
            "deadlineHeight": tx.deadline_height,
            "validity": tx.validity.as_str(),
            "createdAt": tx.created_at.as_secs(),
            "bundle": bundle.map(|b| json!({
                "id": b.id.to_string(),
                "block": b.block,
                "validity": b.validity.as_str(),
                "verifyAttempts": b.verify_attempts,
                "fromNode": b.from_node,
            })),
        });
        self.alerts.dispatch(Alert::transaction(code, reason, info)).await;
        Ok(SweepOutcome::Escalated(code))
    }
}
