//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Job lifecycle counters and the live-job gauge
//! - Rendering for the `/metrics` endpoint

use async_report_jobs::JobStatus;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("report_jobs_submitted_total", "Report jobs accepted for rendering");
    describe_counter!("report_jobs_canceled_total", "Cancel requests that stopped a job");
    describe_counter!(
        "report_jobs_completed_total",
        "Jobs that reached a terminal status, by status"
    );
    describe_counter!(
        "report_content_delivered_bytes_total",
        "Bytes of finished report content handed to clients"
    );
    describe_gauge!("report_jobs_live", "Jobs currently held by the registry");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted() {
    counter!("report_jobs_submitted_total").increment(1);
}

pub fn record_job_canceled() {
    counter!("report_jobs_canceled_total").increment(1);
}

/// Record a job reaching `status`.
pub fn record_job_completed(status: JobStatus) {
    counter!("report_jobs_completed_total", "status" => status.as_str()).increment(1);
}

pub fn record_content_delivered(bytes: u64) {
    counter!("report_content_delivered_bytes_total").increment(bytes);
}

pub fn set_live_jobs(count: usize) {
    gauge!("report_jobs_live").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_job_submitted();
        record_job_canceled();
        record_job_completed(JobStatus::Finished);
        record_content_delivered(128);
        set_live_jobs(3);
    }

    #[test]
    fn test_rendered_metrics_include_recorded_counters() {
        init_metrics();
        record_job_submitted();
        record_job_completed(JobStatus::Failed);

        let output = render_metrics().expect("metrics initialized");
        assert!(output.contains("report_jobs_submitted_total"));
        assert!(output.contains("status=\"FAILED\""));
    }
}
