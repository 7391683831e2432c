//! Observability infrastructure for the UPF operator
//!
//! Provides:
//! - Prometheus metrics (pass latency and outcome, container applies, storage failures)
//! - Structured JSON logging with tracing

use crate::models::{ContainerName, Phase, VolumeName};
use crate::relation::RelationInterface;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for pass durations (in seconds); passes may wait on readiness
const PASS_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0];

const PHASES: [Phase; 5] = [
    Phase::Waiting,
    Phase::Installing,
    Phase::Active,
    Phase::Blocked,
    Phase::Error,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

struct OperatorMetricsInner {
    pass_duration_seconds: Histogram,
    passes_total: IntCounterVec,
    events_coalesced: IntCounter,
    container_applies: IntCounterVec,
    apply_failures: IntCounterVec,
    storage_failures: IntCounterVec,
    containers_ready: IntGauge,
    relation_subscribers: IntGauge,
    phase_info: IntGaugeVec,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            pass_duration_seconds: register_histogram!(
                "upf_operator_pass_duration_seconds",
                "Time spent in one reconciliation pass",
                PASS_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            passes_total: register_int_counter_vec!(
                "upf_operator_passes_total",
                "Reconciliation passes by resulting phase",
                &["phase"]
            )
            .expect("Failed to register passes_total"),

            events_coalesced: register_int_counter!(
                "upf_operator_events_coalesced_total",
                "Events folded into an already pending event"
            )
            .expect("Failed to register events_coalesced"),

            container_applies: register_int_counter_vec!(
                "upf_operator_container_applies_total",
                "Container specs applied to the platform",
                &["container"]
            )
            .expect("Failed to register container_applies"),

            apply_failures: register_int_counter_vec!(
                "upf_operator_container_apply_failures_total",
                "Container specs rejected by the platform",
                &["container"]
            )
            .expect("Failed to register apply_failures"),

            storage_failures: register_int_counter_vec!(
                "upf_operator_storage_failures_total",
                "Failed attempts to provision a volume",
                &["volume"]
            )
            .expect("Failed to register storage_failures"),

            containers_ready: register_int_gauge!(
                "upf_operator_containers_ready",
                "Workload containers observed ready by the last pass"
            )
            .expect("Failed to register containers_ready"),

            relation_subscribers: register_int_gauge!(
                "upf_operator_relation_subscribers",
                "Remote units subscribed to provided relations"
            )
            .expect("Failed to register relation_subscribers"),

            phase_info: register_int_gauge_vec!(
                "upf_operator_phase_info",
                "Current workload phase (1 for the active phase)",
                &["phase"]
            )
            .expect("Failed to register phase_info"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    inner: &'static OperatorMetricsInner,
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new),
        }
    }

    pub fn observe_pass(&self, duration_secs: f64, phase: Phase) {
        self.inner.pass_duration_seconds.observe(duration_secs);
        self.inner
            .passes_total
            .with_label_values(&[phase.as_str()])
            .inc();
    }

    pub fn add_events_coalesced(&self, count: u64) {
        self.inner.events_coalesced.inc_by(count);
    }

    pub fn inc_container_applies(&self, container: ContainerName) {
        self.inner
            .container_applies
            .with_label_values(&[container.as_str()])
            .inc();
    }

    pub fn inc_apply_failures(&self, container: ContainerName) {
        self.inner
            .apply_failures
            .with_label_values(&[container.as_str()])
            .inc();
    }

    pub fn inc_storage_failures(&self, volume: VolumeName) {
        self.inner
            .storage_failures
            .with_label_values(&[volume.as_str()])
            .inc();
    }

    pub fn set_containers_ready(&self, count: i64) {
        self.inner.containers_ready.set(count);
    }

    pub fn set_relation_subscribers(&self, count: i64) {
        self.inner.relation_subscribers.set(count);
    }

    /// Mark `phase` as current and every other phase as inactive
    pub fn set_phase(&self, phase: Phase) {
        for candidate in PHASES {
            let value = if candidate == phase { 1 } else { 0 };
            self.inner
                .phase_info
                .with_label_values(&[candidate.as_str()])
                .set(value);
        }
    }
}

/// Structured logger for operator lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    app_name: String,
}

impl StructuredLogger {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    /// Log operator startup
    pub fn log_startup(&self, version: &str, platform: &str) {
        info!(
            event = "operator_started",
            app = %self.app_name,
            operator_version = %version,
            platform = %platform,
            "UPF operator started"
        );
    }

    /// Log operator shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            app = %self.app_name,
            reason = %reason,
            "UPF operator shutting down"
        );
    }

    /// Log a workload phase change
    pub fn log_phase_transition(&self, from: Phase, to: Phase, message: &str) {
        match to {
            Phase::Error => warn!(
                event = "phase_transition",
                app = %self.app_name,
                from = %from,
                to = %to,
                status_message = %message,
                "Workload entered error state"
            ),
            _ => info!(
                event = "phase_transition",
                app = %self.app_name,
                from = %from,
                to = %to,
                status_message = %message,
                "Workload phase changed"
            ),
        }
    }

    /// Log a container spec applied to the platform
    pub fn log_container_applied(&self, container: ContainerName, image: &str, fingerprint: &str) {
        info!(
            event = "container_applied",
            app = %self.app_name,
            container = %container,
            image = %image,
            fingerprint = %fingerprint,
            "Container spec applied"
        );
    }

    /// Log relation data published or withdrawn
    pub fn log_relation_update(&self, interface: RelationInterface, published: bool, subscribers: usize) {
        let event = if published {
            "relation_published"
        } else {
            "relation_withdrawn"
        };
        info!(
            event = event,
            app = %self.app_name,
            interface = %interface,
            subscribers = subscribers,
            "Relation data updated"
        );
    }

    /// Log workload teardown
    pub fn log_teardown(&self, passes: u64) {
        info!(
            event = "workload_removed",
            app = %self.app_name,
            passes = passes,
            "Workload torn down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_metrics_creation() {
        let metrics = OperatorMetrics::new();
        let again = OperatorMetrics::new();

        metrics.observe_pass(0.01, Phase::Active);
        metrics.add_events_coalesced(2);
        metrics.inc_container_applies(ContainerName::Bessd);
        again.inc_apply_failures(ContainerName::Web);
        again.inc_storage_failures(VolumeName::SharedApp);
        metrics.set_containers_ready(5);
        metrics.set_relation_subscribers(1);
        metrics.set_phase(Phase::Active);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("upf");
        assert_eq!(logger.app_name, "upf");
    }
}
