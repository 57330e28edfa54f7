//! Structured alerts and the injected sink that delivers them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Which relation an alert is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Transaction,
    Bundle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCode {
    /// Deadline passed and the item's parent bundle was never found.
    UnableToLocateParentBundle,
    /// Deadline passed and the item's parent bundle failed verification.
    InvalidParentBundle,
    /// Bundle ran out of verification attempts.
    VerifyAttemptsExhausted,
}

impl AlertCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnableToLocateParentBundle => "UNABLE_TO_LOCATE_PARENT_BUNDLE",
            Self::InvalidParentBundle => "INVALID_PARENT_BUNDLE",
            Self::VerifyAttemptsExhausted => "VERIFY_ATTEMPTS_EXHAUSTED",
        }
    }
}

impl fmt::Display for AlertCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record handed to the alert sink: `{type, code, reason, info}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub code: AlertCode,
    pub reason: String,
    pub info: serde_json::Value,
}

impl Alert {
    pub fn transaction(code: AlertCode, reason: impl Into<String>, info: serde_json::Value) -> Self {
        Self {
            kind: AlertKind::Transaction,
            code,
            reason: reason.into(),
            info,
        }
    }

    pub fn bundle(code: AlertCode, reason: impl Into<String>, info: serde_json::Value) -> Self {
        Self {
            kind: AlertKind::Bundle,
            code,
            reason: reason.into(),
            info,
        }
    }
}

/// Delivery target for alerts, supplied at startup.
///
/// The sink owns its own delivery and retry. Callers log a returned error and
/// move on.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert) -> Result<(), TypesError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_serializes_with_wire_names() {
        let alert = Alert::bundle(
            AlertCode::VerifyAttemptsExhausted,
            "out of attempts",
            serde_json::json!({ "attempts": 3 }),
        );
        let v = serde_json::to_value(&alert).unwrap();
        assert_eq!(v["type"], "bundle");
        assert_eq!(v["code"], "VERIFY_ATTEMPTS_EXHAUSTED");
        assert_eq!(v["info"]["attempts"], 3);
    }

    #[test]
    fn code_display_matches_serde() {
        for code in [
            AlertCode::UnableToLocateParentBundle,
            AlertCode::InvalidParentBundle,
            AlertCode::VerifyAttemptsExhausted,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }
}
