//! Metrics definitions for the Tracker Service per ADR-0011
//!
//! All metrics follow Prometheus naming conventions:
//! - `ts_` prefix for Tracker Service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// ADR-0011: Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signal requests cross the network to the SFU
        .set_buckets_for_metric(
            Matcher::Prefix("ts_signal".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set signal latency buckets: {e}"))?
        // GC sweeps include tracker closes, which can be slow
        .set_buckets_for_metric(
            Matcher::Prefix("ts_gc".to_string()),
            &[0.001, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000, 30.000],
        )
        .map_err(|e| format!("Failed to set GC sweep buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Tracker Runtime Metrics
// ============================================================================

/// Record the outcome of a start call.
///
/// Metric: `ts_tracker_starts_total`
/// Labels: `result` (created, renewed, error, closed)
pub fn record_tracker_start(result: &'static str) {
    counter!("ts_tracker_starts_total", "result" => result).increment(1);
}

/// Record a completed tracker close.
///
/// Metric: `ts_tracker_closes_total`
/// Labels: `reason` (gc, stop, shutdown)
pub fn record_tracker_closed(reason: &'static str) {
    counter!("ts_tracker_closes_total", "reason" => reason).increment(1);
}

/// Record a tracker whose close returned an error.
///
/// Metric: `ts_tracker_close_errors_total`
pub fn record_tracker_close_error() {
    counter!("ts_tracker_close_errors_total").increment(1);
}

/// Set the number of registered tracker entries.
///
/// Counts every status, including failed and stopped entries awaiting GC;
/// live recorders are `ts_tracker_starts_total{result="created"}` minus
/// `ts_tracker_closes_total`.
///
/// Metric: `ts_tracker_entries`
pub fn set_tracker_entries(count: usize) {
    // usize to f64 conversion is safe for realistic entry counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("ts_tracker_entries").set(count as f64);
}

/// Record one GC sweep.
///
/// Metrics: `ts_gc_sweep_duration_seconds`, `ts_gc_evictions_total`
pub fn record_gc_sweep(duration: Duration, evicted: usize) {
    histogram!("ts_gc_sweep_duration_seconds").record(duration.as_secs_f64());
    counter!("ts_gc_evictions_total").increment(evicted as u64);
}

// ============================================================================
// Signal Multiplexer Metrics
// ============================================================================

/// Record a correlated signal request.
///
/// Metric: `ts_signal_request_duration_seconds`
/// Labels: `kind` (join, offer), `outcome` (ok, timeout, canceled, closed, error)
pub fn record_signal_request(kind: &'static str, outcome: &'static str, duration: Duration) {
    histogram!("ts_signal_request_duration_seconds", "kind" => kind, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record a reply that arrived after its waiter gave up.
///
/// Metric: `ts_signal_unwanted_replies_total`
pub fn record_signal_unwanted_reply() {
    counter!("ts_signal_unwanted_replies_total").increment(1);
}

// ============================================================================
// Job Metrics
// ============================================================================

/// Record a recording job put on the queue.
///
/// Metric: `ts_jobs_emitted_total`
/// Labels: `outcome` (completed, failed, dropped)
pub fn record_job_emitted(outcome: &'static str) {
    counter!("ts_jobs_emitted_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the global no-op recorder; they only ensure the
    // recording functions execute without panicking.

    #[test]
    fn test_runtime_metrics_record() {
        record_tracker_start("created");
        record_tracker_start("renewed");
        record_tracker_start("error");
        record_tracker_closed("gc");
        record_tracker_close_error();
        set_tracker_entries(0);
        set_tracker_entries(250);
        record_gc_sweep(Duration::from_millis(3), 2);
    }

    #[test]
    fn test_signal_and_job_metrics_record() {
        record_signal_request("join", "ok", Duration::from_millis(40));
        record_signal_request("offer", "timeout", Duration::from_secs(10));
        record_signal_unwanted_reply();
        record_job_emitted("completed");
    }

    #[test]
    fn test_metrics_captured_by_debugging_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_tracker_start("created");
            record_tracker_closed("stop");
            set_tracker_entries(3);
            record_gc_sweep(Duration::from_millis(1), 1);
            record_signal_request("join", "ok", Duration::from_millis(5));
            record_job_emitted("failed");
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "ts_tracker_starts_total",
            "ts_tracker_closes_total",
            "ts_tracker_entries",
            "ts_gc_sweep_duration_seconds",
            "ts_gc_evictions_total",
            "ts_signal_request_duration_seconds",
            "ts_jobs_emitted_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
    }
}
