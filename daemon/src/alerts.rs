//! Alert delivery for the daemon: newline-delimited JSON appended to a file,
//! or to the log when no file is configured.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use whistle_types::{Alert, AlertSink, TypesError};

pub struct JsonLinesAlertSink {
    path: Option<PathBuf>,
}

impl JsonLinesAlertSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl AlertSink for JsonLinesAlertSink {
    async fn send(&self, alert: Alert) -> Result<(), TypesError> {
        let line = serde_json::to_string(&alert).map_err(|e| TypesError::AlertSink(e.to_string()))?;
        let Some(path) = &self.path else {
            tracing::warn!(target: "whistle_alerts", "{line}");
            return Ok(());
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| TypesError::AlertSink(format!("{}: {e}", path.display())))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| TypesError::AlertSink(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use whistle_types::AlertCode;

    #[tokio::test]
    async fn appends_one_line_per_alert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = JsonLinesAlertSink::new(Some(path.clone()));

        for id in ["a", "b"] {
            sink.send(Alert::transaction(
                AlertCode::UnableToLocateParentBundle,
                "orphan transaction - unable to locate parent bundle",
                json!({ "id": id }),
            ))
            .await
            .unwrap();
        }

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = written.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "transaction");
        assert_eq!(lines[0]["code"], "UNABLE_TO_LOCATE_PARENT_BUNDLE");
        assert_eq!(lines[1]["info"]["id"], "b");
    }

    #[tokio::test]
    async fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesAlertSink::new(Some(dir.path().join("missing").join("alerts.jsonl")));
        let result = sink
            .send(Alert::bundle(AlertCode::VerifyAttemptsExhausted, "exhausted", json!({})))
            .await;
        assert!(matches!(result, Err(TypesError::AlertSink(_))));
    }
}
