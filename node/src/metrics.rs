//! Prometheus metrics for the watchdog.
//!
//! Counters cover verification outcomes, feed traffic and alert delivery.
//! The [`WatchdogMetrics`] struct owns a dedicated [`Registry`] that the
//! `/metrics` endpoint encodes into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry, register_int_gauge_with_registry,
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

pub struct WatchdogMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub bundles_verified: IntCounter,
    pub bundles_invalid: IntCounter,
    /// Attempts that ended without a clean result and were left for a retry.
    pub attempts_inconclusive: IntCounter,
    pub items_valid: IntCounter,
    pub items_invalid: IntCounter,
    /// Items found in a bundle that the feed listeners never delivered.
    pub listener_missed_items: IntCounter,
    pub alerts_sent: IntCounter,
    pub alerts_failed: IntCounter,
    pub feed_messages: IntCounter,
    pub feed_duplicates: IntCounter,
    /// Verification tasks that panicked.
    pub worker_crashes: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Bundles due for verification at the last scheduler run.
    pub verification_backlog: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of one verification attempt, in seconds.
    pub verification_seconds: Histogram,
}

impl WatchdogMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| register_int_counter_with_registry!(Opts::new(name, help), registry);

        let bundles_verified = counter("whistle_bundles_verified_total", "Bundles verified valid")?;
        let bundles_invalid = counter("whistle_bundles_invalid_total", "Bundles finalized invalid")?;
        let attempts_inconclusive = counter(
            "whistle_verify_attempts_inconclusive_total",
            "Verification attempts left for a later retry",
        )?;
        let items_valid = counter("whistle_items_valid_total", "Data items verified valid")?;
        let items_invalid = counter("whistle_items_invalid_total", "Data items that failed verification")?;
        let listener_missed_items = counter(
            "whistle_listener_missed_items_total",
            "Bundled items never seen on a bundler feed",
        )?;
        let alerts_sent = counter("whistle_alerts_sent_total", "Alerts delivered to the sink")?;
        let alerts_failed = counter("whistle_alerts_failed_total", "Alerts the sink rejected")?;
        let feed_messages = counter("whistle_feed_messages_total", "Feed messages accepted")?;
        let feed_duplicates = counter("whistle_feed_duplicates_total", "Feed messages dropped as duplicates")?;
        let worker_crashes = counter("whistle_worker_crashes_total", "Verification tasks that panicked")?;

        let verification_backlog = register_int_gauge_with_registry!(
            Opts::new("whistle_verification_backlog", "Bundles due for verification"),
            registry
        )?;

        // Exponential buckets covering 50 ms → ~15 min.
        let verification_seconds = register_histogram_with_registry!(
            HistogramOpts::new("whistle_verification_seconds", "Verification attempt duration in seconds")
                .buckets(prometheus::exponential_buckets(0.05, 2.0, 15)?),
            registry
        )?;

        Ok(Self {
            registry,
            bundles_verified,
            bundles_invalid,
            attempts_inconclusive,
            items_valid,
            items_invalid,
            listener_missed_items,
            alerts_sent,
            alerts_failed,
            feed_messages,
            feed_duplicates,
            worker_crashes,
            verification_backlog,
            verification_seconds,
        })
    }

    /// Render every metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_registered_counters() {
        let metrics = WatchdogMetrics::new().unwrap();
        metrics.bundles_verified.inc();
        metrics.verification_backlog.set(7);
        let text = metrics.encode().unwrap();
        assert!(text.contains("whistle_bundles_verified_total 1"));
        assert!(text.contains("whistle_verification_backlog 7"));
    }

    #[test]
    fn registries_are_independent() {
        let a = WatchdogMetrics::new().unwrap();
        let b = WatchdogMetrics::new().unwrap();
        a.alerts_sent.inc();
        assert_eq!(b.alerts_sent.get(), 0);
    }
}
