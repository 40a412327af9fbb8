//! Observability infrastructure for the remediation engine
//!
//! Provides:
//! - Prometheus metrics (incident counters, outcome counters, executor
//!   retry counter, processing/apply latency histograms)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for end-to-end and apply latencies (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct EngineMetricsInner {
    incidents_received: IntCounter,
    incidents_malformed: IntCounter,
    outcomes: IntCounterVec,
    executor_retries: IntCounter,
    processing_latency_seconds: Histogram,
    apply_latency_seconds: Histogram,
    active_workers: IntGauge,
    history_records: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            incidents_received: register_int_counter!(
                "remediation_engine_incidents_received_total",
                "Total number of incidents accepted by the ingest stage"
            )
            .expect("Failed to register incidents_received_total"),

            incidents_malformed: register_int_counter!(
                "remediation_engine_incidents_malformed_total",
                "Total number of raw events rejected as malformed"
            )
            .expect("Failed to register incidents_malformed_total"),

            outcomes: register_int_counter_vec!(
                "remediation_engine_outcomes_total",
                "Terminal incident outcomes by outcome and reason code",
                &["outcome", "reason_code"]
            )
            .expect("Failed to register outcomes_total"),

            executor_retries: register_int_counter!(
                "remediation_engine_executor_retries_total",
                "Total number of read-modify-write cycles beyond the first attempt"
            )
            .expect("Failed to register executor_retries_total"),

            processing_latency_seconds: register_histogram!(
                "remediation_engine_processing_latency_seconds",
                "End-to-end incident processing time",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register processing_latency_seconds"),

            apply_latency_seconds: register_histogram!(
                "remediation_engine_apply_latency_seconds",
                "Time spent applying actions against the cluster",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register apply_latency_seconds"),

            active_workers: register_int_gauge!(
                "remediation_engine_active_workers",
                "Number of live per-workload worker tasks"
            )
            .expect("Failed to register active_workers"),

            history_records: register_int_gauge!(
                "remediation_engine_history_records",
                "Number of records currently retained in the history store"
            )
            .expect("Failed to register history_records"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_incidents_received(&self) {
        self.inner().incidents_received.inc();
    }

    pub fn inc_incidents_malformed(&self) {
        self.inner().incidents_malformed.inc();
    }

    /// Count a terminal outcome with its reason code
    pub fn inc_outcome(&self, outcome: &str, reason_code: &str) {
        self.inner()
            .outcomes
            .with_label_values(&[outcome, reason_code])
            .inc();
    }

    pub fn inc_executor_retries(&self) {
        self.inner().executor_retries.inc();
    }

    pub fn observe_processing_latency(&self, duration_secs: f64) {
        self.inner().processing_latency_seconds.observe(duration_secs);
    }

    pub fn observe_apply_latency(&self, duration_secs: f64) {
        self.inner().apply_latency_seconds.observe(duration_secs);
    }

    pub fn set_active_workers(&self, count: i64) {
        self.inner().active_workers.set(count);
    }

    pub fn set_history_records(&self, count: i64) {
        self.inner().history_records.set(count);
    }
}

/// Structured logger for engine events
///
/// Provides consistent JSON-formatted logging for incident outcomes and
/// lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log an accepted incident
    pub fn log_incident_received(&self, incident_id: &str, workload: &str, incident_type: &str) {
        info!(
            event = "incident_received",
            instance = %self.instance,
            incident_id = %incident_id,
            workload = %workload,
            incident_type = %incident_type,
            "Incident received"
        );
    }

    /// Log a terminal incident outcome
    pub fn log_outcome(
        &self,
        incident_id: &str,
        workload: &str,
        incident_type: &str,
        action_kind: &str,
        outcome: &str,
        reason_code: &str,
    ) {
        match outcome {
            "failed" => {
                warn!(
                    event = "incident_resolved",
                    instance = %self.instance,
                    incident_id = %incident_id,
                    workload = %workload,
                    incident_type = %incident_type,
                    action_kind = %action_kind,
                    outcome = %outcome,
                    reason_code = %reason_code,
                    "Remediation failed"
                );
            }
            _ => {
                info!(
                    event = "incident_resolved",
                    instance = %self.instance,
                    incident_id = %incident_id,
                    workload = %workload,
                    incident_type = %incident_type,
                    action_kind = %action_kind,
                    outcome = %outcome,
                    reason_code = %reason_code,
                    "Incident resolved"
                );
            }
        }
    }

    /// Log an applied patch with its value transition
    pub fn log_patch_applied(
        &self,
        workload: &str,
        field_path: &str,
        old_value: f64,
        new_value: f64,
    ) {
        info!(
            event = "patch_applied",
            instance = %self.instance,
            workload = %workload,
            field_path = %field_path,
            old_value = old_value,
            new_value = new_value,
            "Resource spec patched"
        );
    }

    /// Log engine startup
    pub fn log_startup(&self, version: &str, policies: usize) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            engine_version = %version,
            policies = policies,
            "Remediation engine started"
        );
    }

    /// Log engine shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Remediation engine shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_creation() {
        // Metrics register against the global Prometheus registry once;
        // verify observations do not panic.
        let metrics = EngineMetrics::new();

        metrics.inc_incidents_received();
        metrics.inc_outcome("applied", "applied");
        metrics.inc_outcome("rejected", "cooldown-active");
        metrics.observe_processing_latency(0.01);
        metrics.observe_apply_latency(0.05);
        metrics.set_active_workers(2);
        metrics.set_history_records(10);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
    }
}
