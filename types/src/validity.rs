//! Tri-state validity shared by transactions and bundles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a transaction or bundle has been proven good, proven bad, or
/// not decided yet. There is deliberately no `Default`: every record states
/// its validity explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    /// No decision yet.
    Unknown,
    /// Verified (bundle confirmed and parsed, or item signature checked).
    Valid,
    /// Verification failed or the deadline passed unresolved.
    Invalid,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Whether a decision has been recorded (`Valid` or `Invalid`).
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
