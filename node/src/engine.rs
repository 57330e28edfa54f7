//! Per-bundle verification state machine.
//!
//! One call to [`VerificationEngine::verify`] is one attempt:
//!
//! ```text
//! Unknown ──status < threshold / not seeded──▶ Unknown (retry later)
//!    │
//!    ├─ peers ──clean──▶ Valid
//!    │    └─ item errors / transport failure
//!    ├─ gateway ──clean──▶ Valid
//!    │    └─ item errors: link verified items Valid, erroring items Invalid
//!    │
//!    └─ final attempt without a clean result ──▶ Invalid + alert
//! ```
//!
//! The attempt counter is bumped in the store before the first network call,
//! so a crash mid-attempt still spends budget.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use whistle_bundle::{BundleParser, ParseFailure, ParsedBundle};
use whistle_network::{ChunkDownloader, FallbackFetcher, ReplicaProbe, RequestOptions};
use whistle_protocol::{endpoints, TxStatus};
use whistle_store::WatchdogStore;
use whistle_types::{Alert, AlertCode, BundleRecord, Clock, TxId, Validity};

use crate::alert::AlertDispatcher;
use crate::metrics::WatchdogMetrics;
use crate::NodeError;

/// Item errors carried in an exhaustion alert.
const ALERT_ERROR_SAMPLE: usize = 5;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub confirmation_threshold: u64,
    pub max_attempts: u32,
    pub minimum_full_replicas: usize,
    pub probe_replicas_on_failure: bool,
    /// Retries per gateway request once the peers have failed.
    pub gateway_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 50,
            max_attempts: 3,
            minimum_full_replicas: 5,
            probe_replicas_on_failure: false,
            gateway_retries: 3,
        }
    }
}

/// Result of one call to [`VerificationEngine::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// No such bundle in the store.
    Missing,
    /// Already Valid or Invalid; nothing was touched.
    AlreadyFinal(Validity),
    /// Not confirmed deeply enough, or not seeded yet.
    Unconfirmed { attempt: u32, confirmations: Option<u64> },
    Valid { attempt: u32, items: usize, unmatched: usize },
    /// Some items failed verification; the partial result was stored.
    Rejected { attempt: u32, items: usize, errors: usize },
    /// Neither source could deliver the bytes.
    Inconclusive { attempt: u32, reason: String },
    /// Attempt budget spent without a clean result.
    Invalid { attempts: u32, reason: String },
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::AlreadyFinal(_) => "already_final",
            Self::Unconfirmed { .. } => "unconfirmed",
            Self::Valid { .. } => "valid",
            Self::Rejected { .. } => "rejected",
            Self::Inconclusive { .. } => "inconclusive",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// Whether this attempt decided the bundle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid { .. } | Self::Invalid { .. })
    }
}

/// What one byte source produced.
enum SourceResult {
    Clean(ParsedBundle),
    /// Bytes arrived but some items (or the framing) did not check out.
    Content { parsed: ParsedBundle, reason: String },
    Transport(String),
}

/// Evidence gathered by one attempt, before any state is written.
enum Evidence {
    Unconfirmed { confirmations: Option<u64>, reason: String },
    Clean(ParsedBundle),
    Rejected { parsed: ParsedBundle, reason: String },
    Unreachable(String),
}

pub struct VerificationEngine {
    store: Arc<dyn WatchdogStore>,
    fetcher: Arc<FallbackFetcher>,
    downloader: ChunkDownloader,
    parser: BundleParser,
    replicas: Option<Arc<ReplicaProbe>>,
    clock: Arc<dyn Clock>,
    alerts: AlertDispatcher,
    metrics: Arc<WatchdogMetrics>,
    config: EngineConfig,
}

impl VerificationEngine {
    pub fn new(
        store: Arc<dyn WatchdogStore>,
        fetcher: Arc<FallbackFetcher>,
        downloader: ChunkDownloader,
        clock: Arc<dyn Clock>,
        alerts: AlertDispatcher,
        metrics: Arc<WatchdogMetrics>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            downloader,
            parser: BundleParser::new(),
            replicas: None,
            clock,
            alerts,
            metrics,
            config,
        }
    }

    /// Count full replicas after an attempt no source could serve.
    pub fn with_replica_probe(mut self, probe: Arc<ReplicaProbe>) -> Self {
        self.replicas = Some(probe);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one verification attempt for `id`.
    pub async fn verify(&self, id: TxId) -> Result<AttemptOutcome, NodeError> {
        let Some(current) = self.store.get_bundle(&id)? else {
            tracing::warn!(bundle = %id, "bundle not in store");
            return Ok(AttemptOutcome::Missing);
        };
        if current.validity.is_decided() {
            tracing::debug!(bundle = %id, validity = %current.validity, "bundle already decided");
            return Ok(AttemptOutcome::AlreadyFinal(current.validity));
        }
        if current.verify_attempts >= self.config.max_attempts {
            // A previous run spent the last attempt without concluding.
            return self
                .exhaust(&current, "attempt budget spent before a result was recorded", &[])
                .await;
        }

        let now = self.clock.now();
        let Some(record) = self.store.begin_verify_attempt(&id, now)? else {
            return Ok(AttemptOutcome::Missing);
        };
        if record.validity.is_decided() {
            return Ok(AttemptOutcome::AlreadyFinal(record.validity));
        }
        let attempt = record.verify_attempts;
        tracing::info!(bundle = %id, attempt, block = record.block, "verifying bundle");

        let started = Instant::now();
        let evidence = self.gather(&id).await;
        self.metrics
            .verification_seconds
            .observe(started.elapsed().as_secs_f64());

        self.conclude(&record, evidence).await
    }

    async fn gather(&self, id: &TxId) -> Evidence {
        if let Some(unconfirmed) = self.check_confirmations(id).await {
            return unconfirmed;
        }

        let sources = [
            ("peers", RequestOptions::default()),
            (
                "gateway",
                RequestOptions {
                    retries: Some(self.config.gateway_retries),
                    ..RequestOptions::gateway_only()
                },
            ),
        ];
        let mut rejected: Option<(ParsedBundle, String)> = None;
        let mut transport: Option<String> = None;
        for (source, options) in sources {
            match self.read_source(*id, options).await {
                SourceResult::Clean(parsed) => {
                    tracing::debug!(bundle = %id, source, items = parsed.items.len(), "bundle verified");
                    return Evidence::Clean(parsed);
                }
                SourceResult::Content { parsed, reason } => {
                    tracing::warn!(bundle = %id, source, errors = parsed.errors.len(), %reason, "bundle content failed verification");
                    rejected = Some((parsed, reason));
                }
                SourceResult::Transport(reason) => {
                    tracing::warn!(bundle = %id, source, %reason, "could not read bundle");
                    transport = Some(reason);
                }
            }
        }
        match (rejected, transport) {
            (Some((parsed, reason)), _) => Evidence::Rejected { parsed, reason },
            (None, reason) => Evidence::Unreachable(reason.unwrap_or_else(|| "no source attempted".into())),
        }
    }

    /// `None` when the bundle is deep enough to verify.
    async fn check_confirmations(&self, id: &TxId) -> Option<Evidence> {
        let response = match self
            .fetcher
            .request(&endpoints::tx_status(id), &RequestOptions::return_last())
            .await
        {
            Ok(response) => response,
            Err(e) => return Some(Evidence::Unreachable(e.to_string())),
        };
        if response.status != 200 {
            return Some(Evidence::Unconfirmed {
                confirmations: None,
                reason: format!("status lookup returned {}, not seeded yet", response.status),
            });
        }
        match response.json::<TxStatus>() {
            Ok(status) if status.number_of_confirmations >= self.config.confirmation_threshold => None,
            Ok(status) => Some(Evidence::Unconfirmed {
                confirmations: Some(status.number_of_confirmations),
                reason: format!(
                    "{} confirmations, {} required",
                    status.number_of_confirmations, self.config.confirmation_threshold
                ),
            }),
            Err(e) => Some(Evidence::Unconfirmed {
                confirmations: None,
                reason: format!("unreadable status: {e}"),
            }),
        }
    }

    async fn read_source(&self, id: TxId, options: RequestOptions) -> SourceResult {
        let chunks = self.downloader.download(id, options);
        match self.parser.parse(chunks).await {
            Ok(parsed) if parsed.is_clean() => SourceResult::Clean(parsed),
            Ok(parsed) => {
                let reason = format!(
                    "{} of {} items failed verification",
                    parsed.errors.len(),
                    parsed.item_count()
                );
                SourceResult::Content { parsed, reason }
            }
            Err(failure @ ParseFailure::DataSource { .. }) => SourceResult::Transport(failure.to_string()),
            Err(failure) => {
                let reason = failure.to_string();
                SourceResult::Content {
                    parsed: failure.into_partial(),
                    reason,
                }
            }
        }
    }

    async fn conclude(&self, record: &BundleRecord, evidence: Evidence) -> Result<AttemptOutcome, NodeError> {
        let id = record.id;
        let attempt = record.verify_attempts;
        let is_final = attempt >= self.config.max_attempts;

        let (reason, sample) = match evidence {
            Evidence::Clean(parsed) => return self.accept(record, &parsed),
            Evidence::Unconfirmed { confirmations, reason } => {
                tracing::info!(bundle = %id, attempt, %reason, "bundle not ready, requeueing");
                if !is_final {
                    self.metrics.attempts_inconclusive.inc();
                    return Ok(AttemptOutcome::Unconfirmed { attempt, confirmations });
                }
                (reason, Vec::new())
            }
            Evidence::Rejected { parsed, reason } => {
                self.apply_partial(record, &parsed)?;
                let sample: Vec<serde_json::Value> = parsed
                    .errors
                    .iter()
                    .take(ALERT_ERROR_SAMPLE)
                    .map(|e| json!({ "id": e.id.to_string(), "error": e.error.to_string() }))
                    .collect();
                if !is_final {
                    self.metrics.attempts_inconclusive.inc();
                    return Ok(AttemptOutcome::Rejected {
                        attempt,
                        items: parsed.items.len(),
                        errors: parsed.errors.len(),
                    });
                }
                (reason, sample)
            }
            Evidence::Unreachable(reason) => {
                self.probe_replicas(&id).await;
                if !is_final {
                    tracing::warn!(bundle = %id, attempt, %reason, "verification inconclusive, requeueing");
                    self.metrics.attempts_inconclusive.inc();
                    return Ok(AttemptOutcome::Inconclusive { attempt, reason });
                }
                (reason, Vec::new())
            }
        };
        self.exhaust(record, &reason, &sample).await
    }

    fn accept(&self, record: &BundleRecord, parsed: &ParsedBundle) -> Result<AttemptOutcome, NodeError> {
        let id = record.id;
        let now = self.clock.now();
        let ids: Vec<TxId> = parsed.items.iter().map(|item| item.id).collect();
        let present = self.store.link_valid_transactions(&ids, &id, now)?;
        let unmatched = ids.len().saturating_sub(present.len());
        self.report_unmatched(&id, unmatched);

        if !self.store.finalize_bundle(&id, Validity::Valid, now)? {
            let validity = self.store.get_bundle(&id)?.map_or(Validity::Unknown, |b| b.validity);
            return Ok(AttemptOutcome::AlreadyFinal(validity));
        }
        self.metrics.bundles_verified.inc();
        self.metrics.items_valid.inc_by(ids.len() as u64);
        tracing::info!(bundle = %id, attempt = record.verify_attempts, items = ids.len(), unmatched, "bundle valid");
        Ok(AttemptOutcome::Valid {
            attempt: record.verify_attempts,
            items: ids.len(),
            unmatched,
        })
    }

    /// Store what a mixed result proved. Erroring items are left unstamped
    /// so the invalid sweep escalates them once their deadline passes.
    fn apply_partial(&self, record: &BundleRecord, parsed: &ParsedBundle) -> Result<(), NodeError> {
        let id = record.id;
        let now = self.clock.now();
        let valid: Vec<TxId> = parsed.items.iter().map(|item| item.id).collect();
        let invalid: Vec<TxId> = parsed.errors.iter().map(|e| e.id).collect();
        for error in &parsed.errors {
            tracing::warn!(bundle = %id, item = %error.id, error = %error.error, "item failed verification");
        }

        let present_valid = self.store.link_valid_transactions(&valid, &id, now)?;
        let present_invalid = self.store.link_invalid_transactions(&invalid, &id)?;
        self.metrics.items_valid.inc_by(present_valid.len() as u64);
        self.metrics.items_invalid.inc_by(present_invalid.len() as u64);

        let unmatched = (valid.len() + invalid.len()).saturating_sub(present_valid.len() + present_invalid.len());
        self.report_unmatched(&id, unmatched);
        Ok(())
    }

    fn report_unmatched(&self, bundle: &TxId, unmatched: usize) {
        if unmatched > 0 {
            tracing::warn!(bundle = %bundle, unmatched, "bundled items never seen on a feed (missed by listener)");
            self.metrics.listener_missed_items.inc_by(unmatched as u64);
        }
    }

    async fn probe_replicas(&self, id: &TxId) {
        let Some(probe) = self.replicas.as_ref().filter(|_| self.config.probe_replicas_on_failure) else {
            return;
        };
        let location = match self.downloader.offset(id, &RequestOptions::default()).await {
            Ok(location) => location,
            Err(e) => {
                tracing::debug!(bundle = %id, error = %e, "no offset for replica probe");
                return;
            }
        };
        match probe
            .count_full_replicas(&location, self.config.minimum_full_replicas)
            .await
        {
            Ok(found) if found < self.config.minimum_full_replicas => {
                tracing::warn!(bundle = %id, found, minimum = self.config.minimum_full_replicas, "bundle is under-replicated");
            }
            Ok(found) => tracing::info!(bundle = %id, found, "bundle is replicated"),
            Err(e) => tracing::debug!(bundle = %id, error = %e, "replica probe failed"),
        }
    }

    /// Finalize Invalid and alert. The store transition is conditional, so
    /// only the caller that performs it raises the alert.
    async fn exhaust(
        &self,
        record: &BundleRecord,
        reason: &str,
        sample: &[serde_json::Value],
    ) -> Result<AttemptOutcome, NodeError> {
        let id = record.id;
        let now = self.clock.now();
        if !self.store.finalize_bundle(&id, Validity::Invalid, now)? {
            let validity = self.store.get_bundle(&id)?.map_or(Validity::Unknown, |b| b.validity);
            return Ok(AttemptOutcome::AlreadyFinal(validity));
        }
        self.metrics.bundles_invalid.inc();
        let attempts = record.verify_attempts;
        tracing::error!(bundle = %id, attempts, %reason, "bundle invalid, verification attempts exhausted");

        let alert = Alert::bundle(
            AlertCode::VerifyAttemptsExhausted,
            format!("bundle failed verification after {attempts} attempts: {reason}"),
            json!({
                "id": id.to_string(),
                "block": record.block,
                "fromNode": record.from_node,
                "attempts": attempts,
                "lastOutcome": reason,
                "errors": sample,
                "createdAt": record.created_at.as_secs(),
                "lastAttemptAt": record.last_attempt_at.map(|t| t.as_secs()),
                "finalizedAt": now.as_secs(),
            }),
        );
        self.alerts.dispatch(alert).await;

        Ok(AttemptOutcome::Invalid {
            attempts,
            reason: reason.to_string(),
        })
    }
}
