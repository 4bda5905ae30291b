//! Core data models for the sentinel agent

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Control-group path of a workload, relative to the cgroup root.
/// Stable for the lifetime of the workload and the key for all per-workload state.
pub type WorkloadId = String;

/// One reading of a workload's resource counters.
///
/// Counters are cumulative as exposed by the kernel. A field is `None` when the
/// underlying file was missing or unreadable this tick.
#[derive(Debug, Clone)]
pub struct Sample {
    pub workload: WorkloadId,
    /// Wall-clock time of the reading in unix milliseconds
    pub timestamp: i64,
    /// Monotonic time of the reading, used for rate derivation
    pub taken_at: Instant,
    pub cpu_usage_usec: Option<u64>,
    pub cpu_throttled_periods: Option<u64>,
    pub memory_bytes: Option<u64>,
    /// Sum of read and write bytes across all devices
    pub io_bytes: Option<u64>,
}

impl Sample {
    /// Create an empty sample taken now
    pub fn empty(workload: impl Into<WorkloadId>) -> Self {
        Self {
            workload: workload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            taken_at: Instant::now(),
            cpu_usage_usec: None,
            cpu_throttled_periods: None,
            memory_bytes: None,
            io_bytes: None,
        }
    }

    /// True when no counter could be read at all
    pub fn is_blind(&self) -> bool {
        self.cpu_usage_usec.is_none() && self.memory_bytes.is_none() && self.io_bytes.is_none()
    }

    /// CPU demand in CPU-microseconds per second since `previous`
    pub fn cpu_rate_since(&self, previous: &Sample) -> Option<f64> {
        counter_rate(
            previous.cpu_usage_usec?,
            self.cpu_usage_usec?,
            self.taken_at.saturating_duration_since(previous.taken_at),
        )
    }

    /// I/O throughput in bytes per second since `previous`
    pub fn io_rate_since(&self, previous: &Sample) -> Option<f64> {
        counter_rate(
            previous.io_bytes?,
            self.io_bytes?,
            self.taken_at.saturating_duration_since(previous.taken_at),
        )
    }
}

/// Per-second rate of a cumulative counter.
///
/// Returns `None` when no time has elapsed or the counter went backwards
/// (the group was recreated and the counter restarted from zero).
pub fn counter_rate(previous: u64, current: u64, elapsed: Duration) -> Option<f64> {
    if current < previous || elapsed.is_zero() {
        return None;
    }
    Some((current - previous) as f64 / elapsed.as_secs_f64())
}

/// Point-in-time security assessment of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAssessment {
    /// 0 (hostile) to 100 (clean)
    pub score: u8,
    pub risks: BTreeSet<String>,
}

impl TrustAssessment {
    pub fn new(score: u8, risks: impl IntoIterator<Item = String>) -> Self {
        Self {
            score: score.min(100),
            risks: risks.into_iter().collect(),
        }
    }

    /// Fully trusted assessment with no risks
    pub fn trusted() -> Self {
        Self::new(100, Vec::new())
    }

    /// Assessment used when the security backend cannot be reached
    pub fn unavailable(score: u8) -> Self {
        Self::new(score, vec!["security feed unavailable".to_string()])
    }
}

/// Governance state of a workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineState {
    #[default]
    Normal,
    Quarantined,
}

/// Per-tick report pushed to the telemetry collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub node_id: String,
    #[serde(rename = "id")]
    pub workload: WorkloadId,
    /// Cumulative CPU usage in microseconds
    pub cpu_usage: u64,
    /// CPU demand in CPU-microseconds per second, when derivable
    pub cpu_rate: Option<f64>,
    pub memory_bytes: u64,
    pub prediction: f64,
    pub quarantined: bool,
    pub timestamp: i64,
}
