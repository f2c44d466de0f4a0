//! Observability for the admission webhook
//!
//! Provides:
//! - Prometheus metrics (decisions per outcome, decision latency, containers rewritten)
//! - Structured logging of admission decisions with tracing

use crate::review::{AdmissionRequest, AdmissionResponse};
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Admission decisions must come back well inside the API server's webhook timeout
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

static GLOBAL_METRICS: OnceLock<AdmissionMetricsInner> = OnceLock::new();

struct AdmissionMetricsInner {
    requests_total: IntCounterVec,
    latency_seconds: HistogramVec,
    containers_mutated: IntCounterVec,
}

impl AdmissionMetricsInner {
    fn new() -> Self {
        Self {
            requests_total: register_int_counter_vec!(
                "resource_override_admission_requests_total",
                "Admission requests answered, by webhook and outcome",
                &["webhook", "outcome"]
            )
            .expect("Failed to register admission_requests_total"),

            latency_seconds: register_histogram_vec!(
                "resource_override_admission_latency_seconds",
                "Time spent deciding an admission request",
                &["webhook"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register admission_latency_seconds"),

            containers_mutated: register_int_counter_vec!(
                "resource_override_containers_mutated_total",
                "Containers whose resources were rewritten",
                &["webhook"]
            )
            .expect("Failed to register containers_mutated_total"),
        }
    }
}

/// Handle to the process-wide admission metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct AdmissionMetrics {
    _private: (),
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdmissionMetricsInner {
        GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new)
    }

    pub fn observe_decision(&self, webhook: &str, outcome: &str, duration_secs: f64) {
        let inner = self.inner();
        inner
            .requests_total
            .with_label_values(&[webhook, outcome])
            .inc();
        inner
            .latency_seconds
            .with_label_values(&[webhook])
            .observe(duration_secs);
    }

    pub fn inc_containers_mutated(&self, webhook: &str, count: u64) {
        self.inner()
            .containers_mutated
            .with_label_values(&[webhook])
            .inc_by(count);
    }

    pub fn requests_total(&self, webhook: &str, outcome: &str) -> u64 {
        self.inner()
            .requests_total
            .with_label_values(&[webhook, outcome])
            .get()
    }
}

/// Structured logger for admission events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    webhook: String,
}

impl StructuredLogger {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
        }
    }

    /// Log the final decision for one request
    pub fn log_decision(&self, request: &AdmissionRequest, response: &AdmissionResponse, duration_secs: f64) {
        match response.status.as_ref() {
            None if response.patch.is_some() => {
                info!(
                    event = "admission_mutated",
                    webhook = %self.webhook,
                    uid = %request.uid,
                    namespace = %request.namespace,
                    name = %request.name,
                    operation = ?request.operation,
                    duration_secs = duration_secs,
                    "Admitted with patch"
                );
            }
            None => {
                info!(
                    event = "admission_allowed",
                    webhook = %self.webhook,
                    uid = %request.uid,
                    namespace = %request.namespace,
                    name = %request.name,
                    operation = ?request.operation,
                    duration_secs = duration_secs,
                    "Admitted without modification"
                );
            }
            Some(status) => {
                warn!(
                    event = "admission_denied",
                    webhook = %self.webhook,
                    uid = %request.uid,
                    namespace = %request.namespace,
                    name = %request.name,
                    operation = ?request.operation,
                    code = status.code,
                    reason = status.reason.as_str(),
                    message = %status.message,
                    "Admission denied"
                );
            }
        }
    }

    pub fn log_startup(&self, version: &str, configuration: &str) {
        info!(
            event = "webhook_started",
            webhook = %self.webhook,
            version = %version,
            configuration = %configuration,
            "Admission webhook started"
        );
    }

    pub fn log_cache_synced(&self, resource: &str, objects: usize) {
        info!(
            event = "cache_synced",
            webhook = %self.webhook,
            resource = %resource,
            objects = objects,
            "Informer cache synced"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "webhook_shutdown",
            webhook = %self.webhook,
            reason = %reason,
            "Admission webhook shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::Operation;
    use serde_json::json;

    #[test]
    fn test_metrics_count_per_outcome() {
        let metrics = AdmissionMetrics::new();
        let before = metrics.requests_total("metrics-test", "mutated");

        metrics.observe_decision("metrics-test", "mutated", 0.001);
        metrics.observe_decision("metrics-test", "mutated", 0.002);
        metrics.observe_decision("metrics-test", "Forbidden", 0.001);
        metrics.inc_containers_mutated("metrics-test", 3);

        assert_eq!(metrics.requests_total("metrics-test", "mutated"), before + 2);
        assert!(metrics.requests_total("metrics-test", "Forbidden") >= 1);
    }

    #[test]
    fn test_logger_handles_every_outcome() {
        let logger = StructuredLogger::new("logger-test");
        let request = AdmissionRequest::for_pod("1", "ns", Operation::Create, json!({}));

        logger.log_decision(&request, &AdmissionResponse::allowed(&request), 0.0);
        logger.log_decision(&request, &AdmissionResponse::with_patch(&request, b"[]".to_vec()), 0.0);
        logger.log_decision(&request, &AdmissionResponse::forbidden(&request, "denied"), 0.0);
        assert_eq!(logger.webhook, "logger-test");
    }
}
