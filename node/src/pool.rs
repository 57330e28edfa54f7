//! Bounded pool of isolated verification tasks.
//!
//! Every bundle verifies in its own spawned task, at most `concurrency` at a
//! time. A task that panics is reported and dropped; the batch and the
//! scheduler carry on.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use whistle_types::TxId;

use crate::engine::{AttemptOutcome, VerificationEngine};
use crate::metrics::WatchdogMetrics;
use crate::NodeError;

#[async_trait]
pub trait BundleVerifier: Send + Sync {
    async fn verify(&self, id: TxId) -> Result<AttemptOutcome, NodeError>;
}

#[async_trait]
impl BundleVerifier for VerificationEngine {
    async fn verify(&self, id: TxId) -> Result<AttemptOutcome, NodeError> {
        VerificationEngine::verify(self, id).await
    }
}

/// How a batch went.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(TxId, AttemptOutcome)>,
    pub errors: Vec<(TxId, String)>,
    /// Tasks that panicked.
    pub crashed: usize,
}

impl BatchReport {
    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }

    /// Bundles this batch moved to Valid or Invalid.
    pub fn decided(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_terminal()).count()
    }
}

pub struct WorkerPool {
    verifier: Arc<dyn BundleVerifier>,
    permits: Arc<Semaphore>,
    metrics: Arc<WatchdogMetrics>,
}

impl WorkerPool {
    pub fn new(verifier: Arc<dyn BundleVerifier>, concurrency: usize, metrics: Arc<WatchdogMetrics>) -> Self {
        Self {
            verifier,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            metrics,
        }
    }

    /// Verify every id and wait for all of them.
    pub async fn run_batch(&self, ids: Vec<TxId>) -> BatchReport {
        let mut tasks = JoinSet::new();
        for id in ids {
            let verifier = Arc::clone(&self.verifier);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let result = AssertUnwindSafe(verifier.verify(id)).catch_unwind().await;
                (id, result)
            });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(Ok(outcome)))) => report.outcomes.push((id, outcome)),
                Ok((id, Ok(Err(e)))) => {
                    tracing::error!(bundle = %id, error = %e, "verification failed");
                    report.errors.push((id, e.to_string()));
                }
                Ok((id, Err(panic))) => {
                    tracing::error!(bundle = %id, panic = panic_message(panic.as_ref()), "verification task panicked");
                    self.crashed(&mut report);
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(error = %e, "verification task panicked");
                    self.crashed(&mut report);
                }
                Err(e) => tracing::warn!(error = %e, "verification task cancelled"),
            }
        }
        report
    }

    fn crashed(&self, report: &mut BatchReport) {
        self.metrics.worker_crashes.inc();
        report.crashed += 1;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Scripted {
        running: AtomicUsize,
        peak: AtomicUsize,
        panic_on: Option<TxId>,
    }

    impl Scripted {
        fn new(panic_on: Option<TxId>) -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                panic_on,
            }
        }
    }

    #[async_trait]
    impl BundleVerifier for Scripted {
        async fn verify(&self, id: TxId) -> Result<AttemptOutcome, NodeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if Some(id) == self.panic_on {
                panic!("verifier blew up");
            }
            Ok(AttemptOutcome::Valid {
                attempt: 1,
                items: 0,
                unmatched: 0,
            })
        }
    }

    fn ids(n: u8) -> Vec<TxId> {
        (0..n).map(|i| TxId::new([i; 32])).collect()
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let verifier = Arc::new(Scripted::new(None));
        let pool = WorkerPool::new(verifier.clone(), 2, Arc::new(WatchdogMetrics::new().unwrap()));
        let report = pool.run_batch(ids(6)).await;
        assert_eq!(report.count("valid"), 6);
        assert!(verifier.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn decided_counts_only_final_outcomes() {
        let report = BatchReport {
            outcomes: vec![
                (TxId::new([1; 32]), AttemptOutcome::Valid { attempt: 1, items: 2, unmatched: 0 }),
                (TxId::new([2; 32]), AttemptOutcome::Invalid { attempts: 3, reason: "exhausted".into() }),
                (TxId::new([3; 32]), AttemptOutcome::Rejected { attempt: 1, items: 1, errors: 1 }),
                (TxId::new([4; 32]), AttemptOutcome::AlreadyFinal(whistle_types::Validity::Valid)),
                (TxId::new([5; 32]), AttemptOutcome::Unconfirmed { attempt: 2, confirmations: Some(3) }),
            ],
            ..BatchReport::default()
        };
        assert_eq!(report.decided(), 2);
        assert_eq!(report.count("rejected"), 1);
    }

    #[tokio::test]
    async fn panicking_task_does_not_sink_the_batch() {
        let all = ids(4);
        let metrics = Arc::new(WatchdogMetrics::new().unwrap());
        let pool = WorkerPool::new(Arc::new(Scripted::new(Some(all[1]))), 4, Arc::clone(&metrics));
        let report = pool.run_batch(all.clone()).await;
        assert_eq!(report.crashed, 1);
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(|(id, _)| *id != all[1]));
        assert_eq!(metrics.worker_crashes.get(), 1);
    }
}
