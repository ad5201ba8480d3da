//! Observability infrastructure for the health model pipeline
//!
//! Provides:
//! - Prometheus metrics (cycle latency, signal counts, emission, persistence)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::MonitorState;

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    cycles: IntCounter,
    cycle_failures: IntCounter,
    cycle_latency_seconds: Histogram,
    signals_received: IntGauge,
    signals_reduced: IntGauge,
    signals_missing: IntGauge,
    records_emitted: IntCounter,
    persistence_failures: IntCounter,
    invalid_batches: IntCounter,
    buffered_rows: IntGauge,
    tracked_instances: IntGauge,
    cluster_state: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            cycles: register_int_counter!(
                "health_model_cycles_total",
                "Evaluation cycles completed"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures: register_int_counter!(
                "health_model_cycle_failures_total",
                "Evaluation cycles whose output was discarded"
            )
            .expect("Failed to register cycle_failures_total"),

            cycle_latency_seconds: register_histogram!(
                "health_model_cycle_latency_seconds",
                "Time spent evaluating one cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            signals_received: register_int_gauge!(
                "health_model_signals_received",
                "Signal rows received in the last cycle"
            )
            .expect("Failed to register signals_received"),

            signals_reduced: register_int_gauge!(
                "health_model_signals_reduced",
                "Signals left after deduplication and pruning in the last cycle"
            )
            .expect("Failed to register signals_reduced"),

            signals_missing: register_int_gauge!(
                "health_model_signals_missing",
                "Signals synthesized for silent instances in the last cycle"
            )
            .expect("Failed to register signals_missing"),

            records_emitted: register_int_counter!(
                "health_model_records_emitted_total",
                "Monitor records emitted"
            )
            .expect("Failed to register records_emitted_total"),

            persistence_failures: register_int_counter!(
                "health_model_persistence_failures_total",
                "State snapshot writes that failed"
            )
            .expect("Failed to register persistence_failures_total"),

            invalid_batches: register_int_counter!(
                "health_model_invalid_batches_total",
                "Batches rejected for an unrecognized tag"
            )
            .expect("Failed to register invalid_batches_total"),

            buffered_rows: register_int_gauge!(
                "health_model_buffered_rows",
                "Signal rows waiting for the cycle trigger"
            )
            .expect("Failed to register buffered_rows"),

            tracked_instances: register_int_gauge!(
                "health_model_tracked_instances",
                "Monitor instances held in the state store"
            )
            .expect("Failed to register tracked_instances"),

            cluster_state: register_int_gauge!(
                "health_model_cluster_state",
                "Cluster root state (0 pass, 1 none, 2 unknown, 3 warning, 4 fail)"
            )
            .expect("Failed to register cluster_state"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal counts of one evaluated cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounts {
    pub received: usize,
    pub reduced: usize,
    pub missing: usize,
    pub emitted: usize,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_cycle(&self, duration_secs: f64, counts: CycleCounts) {
        let inner = self.inner();
        inner.cycles.inc();
        inner.cycle_latency_seconds.observe(duration_secs);
        inner.signals_received.set(counts.received as i64);
        inner.signals_reduced.set(counts.reduced as i64);
        inner.signals_missing.set(counts.missing as i64);
        inner.records_emitted.inc_by(counts.emitted as u64);
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures.inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }

    pub fn inc_invalid_batches(&self) {
        self.inner().invalid_batches.inc();
    }

    pub fn set_buffered_rows(&self, rows: usize) {
        self.inner().buffered_rows.set(rows as i64);
    }

    pub fn set_tracked_instances(&self, count: usize) {
        self.inner().tracked_instances.set(count as i64);
    }

    pub fn set_cluster_state(&self, state: MonitorState) {
        self.inner().cluster_state.set(state.ordinal());
    }
}

/// Structured logger for health model events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_id: String,
}

impl StructuredLogger {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn log_startup(&self, version: &str, monitors: usize, restored_instances: usize) {
        info!(
            event = "agent_started",
            cluster_id = %self.cluster_id,
            agent_version = %version,
            monitors = monitors,
            restored_instances = restored_instances,
            "Health model agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster_id = %self.cluster_id,
            reason = %reason,
            "Health model agent shutting down"
        );
    }

    pub fn log_cycle(&self, counts: CycleCounts, cluster_state: MonitorState, duration_ms: u128) {
        info!(
            event = "cycle_completed",
            cluster_id = %self.cluster_id,
            received = counts.received,
            reduced = counts.reduced,
            missing = counts.missing,
            emitted = counts.emitted,
            cluster_state = %cluster_state,
            duration_ms = duration_ms as u64,
            "Health model cycle completed"
        );
    }

    pub fn log_cycle_failed(&self, error: &str) {
        warn!(
            event = "cycle_failed",
            cluster_id = %self.cluster_id,
            error = %error,
            "Health model cycle failed, output discarded"
        );
    }

    pub fn log_kube_api_down(&self, affected: usize) {
        warn!(
            event = "kube_api_down",
            cluster_id = %self.cluster_id,
            affected_signals = affected,
            "Kube API unreachable, neutralizing dependent signals"
        );
    }

    pub fn log_cluster_state_change(&self, old_state: MonitorState, new_state: MonitorState) {
        if new_state == MonitorState::Fail {
            warn!(
                event = "cluster_state_changed",
                cluster_id = %self.cluster_id,
                old_state = %old_state,
                new_state = %new_state,
                "Cluster health changed"
            );
        } else {
            info!(
                event = "cluster_state_changed",
                cluster_id = %self.cluster_id,
                old_state = %old_state,
                new_state = %new_state,
                "Cluster health changed"
            );
        }
    }

    pub fn log_persistence_failure(&self, path: &str, error: &str) {
        warn!(
            event = "persistence_failed",
            cluster_id = %self.cluster_id,
            path = %path,
            error = %error,
            "Failed to persist monitor state, continuing in memory"
        );
    }
}
