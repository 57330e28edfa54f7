//! Fire-and-forward delivery of alerts to the injected sink.

use std::sync::Arc;

use whistle_types::{Alert, AlertSink};

use crate::metrics::WatchdogMetrics;

#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    metrics: Arc<WatchdogMetrics>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, metrics: Arc<WatchdogMetrics>) -> Self {
        Self { sink, metrics }
    }

    /// Log and send `alert`. A sink failure is logged and counted, never
    /// returned.
    pub async fn dispatch(&self, alert: Alert) {
        tracing::error!(
            kind = ?alert.kind,
            code = %alert.code,
            reason = %alert.reason,
            info = %alert.info,
            "raising alert"
        );
        let code = alert.code;
        match self.sink.send(alert).await {
            Ok(()) => self.metrics.alerts_sent.inc(),
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "alert sink failed");
                self.metrics.alerts_failed.inc();
            }
        }
    }
}
