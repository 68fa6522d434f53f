//! # Service Metrics
//!
//! Prometheus metrics for webhook intake and run storage. Instances register
//! against the default registry, which the `/metrics` endpoint gathers.

use prometheus::{Histogram, IntCounter};
use run_board_core::{IngestOutcome, SweepReport, WebhookError};
use std::sync::Arc;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    // HTTP request metrics
    pub http_requests_total: IntCounter,
    pub http_request_duration: Histogram,

    // Webhook intake metrics
    pub webhook_requests_total: IntCounter,
    pub webhook_signature_failures: IntCounter,
    pub webhook_events_ignored: IntCounter,

    // Run storage metrics
    pub workflow_runs_upserted: IntCounter,
    pub workflow_runs_swept: IntCounter,
}

impl ServiceMetrics {
    /// Register all metrics against the default prometheus registry
    ///
    /// # Errors
    ///
    /// Returns an error when a metric name is already registered; the service
    /// constructs this once per process.
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        use prometheus::{register_histogram, register_int_counter};

        Ok(Arc::new(Self {
            http_requests_total: register_int_counter!(
                "http_requests_total",
                "Total number of HTTP requests"
            )?,
            http_request_duration: register_histogram!(
                "http_request_duration_seconds",
                "HTTP request processing time",
                vec![0.001, 0.01, 0.1, 1.0, 10.0]
            )?,

            webhook_requests_total: register_int_counter!(
                "webhook_requests_total",
                "Total webhook deliveries received"
            )?,
            webhook_signature_failures: register_int_counter!(
                "webhook_signature_failures",
                "Deliveries rejected by signature verification"
            )?,
            webhook_events_ignored: register_int_counter!(
                "webhook_events_ignored",
                "Deliveries acknowledged without processing"
            )?,

            workflow_runs_upserted: register_int_counter!(
                "workflow_runs_upserted_total",
                "Workflow run rows created or updated"
            )?,
            workflow_runs_swept: register_int_counter!(
                "workflow_runs_swept_total",
                "Workflow run rows deleted by the retention sweep"
            )?,
        }))
    }

    pub fn record_http_request(&self, duration: std::time::Duration) {
        self.http_requests_total.inc();
        self.http_request_duration.observe(duration.as_secs_f64());
    }

    /// Record the outcome of a successfully processed delivery
    pub fn record_ingest_outcome(&self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Stored { .. } => self.workflow_runs_upserted.inc(),
            IngestOutcome::Ignored { .. } => self.webhook_events_ignored.inc(),
        }
    }

    /// Record a pipeline failure
    pub fn record_ingest_failure(&self, error: &WebhookError) {
        if error.is_authentication_failure() {
            self.webhook_signature_failures.inc();
        }
    }

    /// Record a maintenance sweep result
    pub fn record_sweep(&self, report: &SweepReport) {
        self.workflow_runs_swept.inc_by(report.runs_deleted as u64);
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        // Test instances get timestamp-suffixed names so repeated
        // registrations against the global registry never collide.
        // Production code uses ServiceMetrics::new() instead.
        use prometheus::{register_histogram, register_int_counter};

        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        Self {
            http_requests_total: register_int_counter!(
                format!("http_requests_total_test_{}", suffix),
                "Test HTTP requests"
            )
            .unwrap(),
            http_request_duration: register_histogram!(
                format!("http_request_duration_seconds_test_{}", suffix),
                "Test HTTP duration",
                vec![0.001, 0.01, 0.1, 1.0, 10.0]
            )
            .unwrap(),
            webhook_requests_total: register_int_counter!(
                format!("webhook_requests_total_test_{}", suffix),
                "Test webhook requests"
            )
            .unwrap(),
            webhook_signature_failures: register_int_counter!(
                format!("webhook_signature_failures_test_{}", suffix),
                "Test signature failures"
            )
            .unwrap(),
            webhook_events_ignored: register_int_counter!(
                format!("webhook_events_ignored_test_{}", suffix),
                "Test ignored events"
            )
            .unwrap(),
            workflow_runs_upserted: register_int_counter!(
                format!("workflow_runs_upserted_total_test_{}", suffix),
                "Test run upserts"
            )
            .unwrap(),
            workflow_runs_swept: register_int_counter!(
                format!("workflow_runs_swept_total_test_{}", suffix),
                "Test run sweeps"
            )
            .unwrap(),
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
