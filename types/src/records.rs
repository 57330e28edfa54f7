//! Persisted records for the four watchdog relations.
//!
//! Rows are keyed by `id` (transactions, bundles) or `url` (peers, bundlers).
//! Every write path is insert-or-ignore or a conditional update so that
//! re-delivered feed messages and concurrent verifications stay idempotent.

use serde::{Deserialize, Serialize};

use crate::{Timestamp, TxId, Validity};

/// A data item observed from a bundler feed or found during reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxId,
    pub validity: Validity,
    /// Parent bundle, once known.
    pub bundled_in: Option<TxId>,
    /// Ledger height by which the item must be resolved.
    pub deadline_height: u64,
    /// Set only on a clean verification or on escalation by the invalid sweep.
    pub last_verified_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TransactionRecord {
    /// A freshly observed, undecided transaction.
    pub fn observed(id: TxId, deadline_height: u64, now: Timestamp) -> Self {
        Self {
            id,
            validity: Validity::Unknown,
            bundled_in: None,
            deadline_height,
            last_verified_at: None,
            created_at: now,
        }
    }
}

/// A bundle transaction posted to the base ledger by a bundler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub id: TxId,
    /// Ledger height of inclusion.
    pub block: u64,
    pub validity: Validity,
    pub last_verified_at: Option<Timestamp>,
    /// Start of the most recent verification attempt.
    pub last_attempt_at: Option<Timestamp>,
    /// Monotonic; bumped before each attempt's first network call.
    pub verify_attempts: u32,
    /// URL of the bundler that posted it, when known.
    pub from_node: Option<String>,
    pub created_at: Timestamp,
}

impl BundleRecord {
    pub fn discovered(id: TxId, block: u64, from_node: Option<String>, now: Timestamp) -> Self {
        Self {
            id,
            block,
            validity: Validity::Unknown,
            last_verified_at: None,
            last_attempt_at: None,
            verify_attempts: 0,
            from_node,
            created_at: now,
        }
    }
}

/// A ledger network peer with its trust score in `[TRUST_MIN, TRUST_MAX]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub url: String,
    pub trust: f64,
    pub created_at: Timestamp,
    pub last_praised_at: Option<Timestamp>,
}

impl PeerRecord {
    pub fn new(url: impl Into<String>, trust: f64, now: Timestamp) -> Self {
        Self {
            url: url.into(),
            trust,
            created_at: now,
            last_praised_at: None,
        }
    }
}

/// A watched bundler node and the ledger address its bundles are posted from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlerRecord {
    pub url: String,
    pub address: String,
}
