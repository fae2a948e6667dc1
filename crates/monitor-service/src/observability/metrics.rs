//! Metrics definitions for the proctoring monitor
//!
//! All metrics follow Prometheus naming conventions:
//! - `monitor_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 5 values (controller, view, peer_link, frame_relay, reconciler)
//! - `reason`: 6 close reasons
//! - `outcome`: 3-4 values per metric
//!
//! No label ever carries a participant, observer or session id.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use monitor_protocol::CloseReason;
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Reconcile buckets cover
/// a fan-out of store reads (p99 target < 1s).
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("monitor_reconcile".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set reconcile duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of open monitoring views.
///
/// Metric: `monitor_views_active`
pub fn set_views_active(count: usize) {
    // usize to f64 conversion is safe for realistic view counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("monitor_views_active").set(count as f64);
}

/// Set the number of live peer links across all views.
///
/// Metric: `monitor_peer_links_active`
pub fn set_peer_links_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("monitor_peer_links_active").set(count as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record a peer link reaching `Closed`.
///
/// Metric: `monitor_peer_links_closed_total`
/// Labels: `reason`
pub fn record_peer_link_closed(reason: CloseReason) {
    counter!("monitor_peer_links_closed_total", "reason" => reason.as_str()).increment(1);
}

/// Record an offer rejected because the pair was not idle.
///
/// Metric: `monitor_offers_rejected_total`
///
/// Non-zero values are expected: clients retry offers.
pub fn record_offer_rejected() {
    counter!("monitor_offers_rejected_total").increment(1);
}

// ============================================================================
// Frames & warnings
// ============================================================================

/// Record a frame relay outcome.
///
/// Metric: `monitor_frames_total`
/// Labels: `outcome` (accepted, malformed, throttled, out_of_order, overflow)
pub fn record_frame(outcome: &'static str) {
    counter!("monitor_frames_total", "outcome" => outcome).increment(1);
}

/// Record a warning dispatch outcome.
///
/// Metric: `monitor_warnings_total`
/// Labels: `outcome` (sent, failed, timeout, rejected)
pub fn record_warning(outcome: &'static str) {
    counter!("monitor_warnings_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Record one reconciliation cycle.
///
/// Metrics: `monitor_reconcile_duration_seconds`, and
/// `monitor_reconcile_partial_total` when any source was stale.
pub fn record_reconcile(duration: Duration, partial: bool) {
    histogram!("monitor_reconcile_duration_seconds").record(duration.as_secs_f64());
    if partial {
        counter!("monitor_reconcile_partial_total").increment(1);
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `monitor_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("monitor_actor_panics_total", "actor_type" => actor_type).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These tests run against the global no-op recorder unless one is
    // installed locally; they only check that recording never panics.

    #[test]
    fn test_gauges() {
        set_views_active(0);
        set_views_active(12);
        set_peer_links_active(40);
    }

    #[test]
    fn test_counters_with_bounded_labels() {
        for reason in [
            CloseReason::Requested,
            CloseReason::NegotiationFailed,
            CloseReason::TransportFailed,
            CloseReason::MediaLost,
            CloseReason::NegotiationTimeout,
            CloseReason::ViewClosed,
        ] {
            record_peer_link_closed(reason);
        }
        record_offer_rejected();
        for outcome in ["accepted", "malformed", "throttled", "out_of_order", "overflow"] {
            record_frame(outcome);
        }
        for outcome in ["sent", "failed", "timeout", "rejected"] {
            record_warning(outcome);
        }
        for actor_type in ["controller", "view", "peer_link", "frame_relay", "reconciler"] {
            record_actor_panic(actor_type);
        }
    }

    #[test]
    fn test_reconcile_metrics_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_reconcile(Duration::from_millis(40), false);
            record_reconcile(Duration::from_millis(60), true);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let partial = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "monitor_reconcile_partial_total")
            .map(|(_, _, _, value)| value);
        assert_eq!(partial, Some(&DebugValue::Counter(1)));

        let durations = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "monitor_reconcile_duration_seconds")
            .map(|(_, _, _, value)| value);
        assert!(matches!(durations, Some(DebugValue::Histogram(v)) if v.len() == 2));
    }
}
