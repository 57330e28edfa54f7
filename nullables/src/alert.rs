//! Nullable alert sink: records alerts instead of delivering them.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use whistle_types::{Alert, AlertCode, AlertSink, TypesError};

#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
    failing: AtomicBool,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `send` fail (the alert is still recorded).
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().expect("alert sink lock poisoned").clone()
    }

    pub fn count(&self, code: AlertCode) -> usize {
        self.alerts().iter().filter(|a| a.code == code).count()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send(&self, alert: Alert) -> Result<(), TypesError> {
        self.alerts.lock().expect("alert sink lock poisoned").push(alert);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TypesError::AlertSink("delivery refused".into()));
        }
        Ok(())
    }
}
