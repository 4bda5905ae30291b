//! Observability infrastructure for the sentinel agent
//!
//! Provides:
//! - Prometheus metrics (tick latency, prediction latency, limit writes, quarantines)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    tick_latency_seconds: Histogram,
    prediction_latency_seconds: Histogram,
    predictor_info: GaugeVec,
    workloads_tracked: IntGauge,
    workloads_quarantined: IntGauge,
    limit_writes: IntCounterVec,
    sampler_degraded: IntCounter,
    predictor_fallbacks: IntCounter,
    security_scans: IntCounterVec,
    telemetry_failures: IntCounter,
    workload_timeouts: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "sentinel_agent_tick_latency_seconds",
                "Time spent evaluating all workloads in one tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            prediction_latency_seconds: register_histogram!(
                "sentinel_agent_prediction_latency_seconds",
                "Time spent forecasting demand for one workload",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictor_info: register_gauge_vec!(
                "sentinel_agent_predictor_info",
                "Predictor implementation selected at startup",
                &["predictor"]
            )
            .expect("Failed to register predictor_info"),

            workloads_tracked: register_int_gauge!(
                "sentinel_agent_workloads_tracked",
                "Number of workloads under control"
            )
            .expect("Failed to register workloads_tracked"),

            workloads_quarantined: register_int_gauge!(
                "sentinel_agent_workloads_quarantined",
                "Number of workloads currently quarantined"
            )
            .expect("Failed to register workloads_quarantined"),

            limit_writes: register_int_counter_vec!(
                "sentinel_agent_limit_writes_total",
                "Limit writes by resource and outcome",
                &["resource", "outcome"]
            )
            .expect("Failed to register limit_writes"),

            sampler_degraded: register_int_counter!(
                "sentinel_agent_sampler_degraded_total",
                "Samples where no counter could be read"
            )
            .expect("Failed to register sampler_degraded"),

            predictor_fallbacks: register_int_counter!(
                "sentinel_agent_predictor_fallbacks_total",
                "Forecasts replaced because the predictor exceeded its budget"
            )
            .expect("Failed to register predictor_fallbacks"),

            security_scans: register_int_counter_vec!(
                "sentinel_agent_security_scans_total",
                "Security feed queries by outcome",
                &["outcome"]
            )
            .expect("Failed to register security_scans"),

            telemetry_failures: register_int_counter!(
                "sentinel_agent_telemetry_failures_total",
                "Telemetry pushes that failed"
            )
            .expect("Failed to register telemetry_failures"),

            workload_timeouts: register_int_counter!(
                "sentinel_agent_workload_timeouts_total",
                "Workload evaluations skipped after exceeding their timeout"
            )
            .expect("Failed to register workload_timeouts"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    /// Record which predictor serves forecasts
    pub fn set_predictor(&self, name: &str) {
        self.inner().predictor_info.reset();
        self.inner()
            .predictor_info
            .with_label_values(&[name])
            .set(1.0);
    }

    pub fn set_workloads_tracked(&self, count: i64) {
        self.inner().workloads_tracked.set(count);
    }

    pub fn set_workloads_quarantined(&self, count: i64) {
        self.inner().workloads_quarantined.set(count);
    }

    /// Count a limit write; `outcome` is `applied`, `dry_run` or `failed`
    pub fn inc_limit_write(&self, resource: &str, outcome: &str) {
        self.inner()
            .limit_writes
            .with_label_values(&[resource, outcome])
            .inc();
    }

    pub fn inc_sampler_degraded(&self) {
        self.inner().sampler_degraded.inc();
    }

    pub fn inc_predictor_fallbacks(&self) {
        self.inner().predictor_fallbacks.inc();
    }

    /// Count a security feed query; `outcome` is `ok` or `unavailable`
    pub fn inc_security_scan(&self, outcome: &str) {
        self.inner()
            .security_scans
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_telemetry_failures(&self) {
        self.inner().telemetry_failures.inc();
    }

    pub fn inc_workload_timeouts(&self) {
        self.inner().workload_timeouts.inc();
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for limit changes
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a limit write
    pub fn log_limit_applied(&self, workload: &str, resource: &str, value: &str, dry_run: bool) {
        info!(
            event = "limit_applied",
            node = %self.node_name,
            workload = %workload,
            resource = %resource,
            value = %value,
            dry_run = dry_run,
            "Resource limit applied"
        );
    }

    /// Log a limit write that could not be committed
    pub fn log_limit_write_failed(&self, workload: &str, resource: &str, error: &str) {
        warn!(
            event = "limit_write_failed",
            node = %self.node_name,
            workload = %workload,
            resource = %resource,
            error = %error,
            "Resource limit write failed, previous limit stays in effect"
        );
    }

    /// Log the outcome of one tick
    pub fn log_tick(&self, evaluated: usize, skipped: usize, timed_out: usize, elapsed_ms: u128) {
        info!(
            event = "tick_complete",
            node = %self.node_name,
            evaluated = evaluated,
            skipped = skipped,
            timed_out = timed_out,
            elapsed_ms = elapsed_ms,
            "Control tick complete"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, predictor: &str, workloads: usize, dry_run: bool) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            predictor = %predictor,
            workloads = workloads,
            dry_run = dry_run,
            "Sentinel agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Sentinel agent shutting down"
        );
    }
}
