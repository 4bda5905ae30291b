//! Resource limit enforcement
//!
//! Applies or clears CPU, memory and I/O limits of one workload by writing
//! the cgroup v2 control files:
//! - cpu.max: `max` or `<quota> <period>`
//! - memory.max: `max` or `<bytes>`
//! - io.max: `<major>:<minor> rbps=<n> wbps=<n>` per device

mod cgroup;
mod writer;

pub use cgroup::CgroupEnforcer;
pub use writer::{AtomicFileWriter, DryRunWriter, JournalEntry, LimitWriter};

use crate::error::Result;
use std::path::PathBuf;

/// Default CPU bandwidth period (100ms)
pub const DEFAULT_CPU_PERIOD_USEC: u64 = 100_000;

/// Outcome of a successful enforcement call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedLimit {
    /// Control file the value was (or would have been) written to
    pub target: PathBuf,
    /// Exact value written, one line per write
    pub value: String,
    /// True when no write actually happened
    pub dry_run: bool,
}

/// Trait for limit enforcement implementations.
///
/// Calls are blocking; async callers run them on the blocking pool.
/// `None` clears the limit.
pub trait ResourceEnforcer: Send + Sync {
    /// Set `cpu.max`. Quota is clamped to at least 1 microsecond.
    fn set_cpu_limit(
        &self,
        workload: &str,
        quota_usec: Option<u64>,
        period_usec: u64,
    ) -> Result<AppliedLimit>;

    /// Set `memory.max`. The limit is clamped to at least 1 byte.
    fn set_memory_limit(&self, workload: &str, bytes: Option<u64>) -> Result<AppliedLimit>;

    /// Set read and write throughput limits in `io.max`
    fn set_io_limit(&self, workload: &str, bytes_per_sec: Option<u64>) -> Result<AppliedLimit>;
}

/// Format a `cpu.max` value
pub fn format_cpu_max(quota_usec: Option<u64>, period_usec: u64) -> String {
    match quota_usec {
        None => "max".to_string(),
        Some(quota) => format!("{} {}", quota.max(1), period_usec),
    }
}

/// Format a `memory.max` value
pub fn format_memory_max(bytes: Option<u64>) -> String {
    match bytes {
        None => "max".to_string(),
        Some(bytes) => bytes.max(1).to_string(),
    }
}

/// Format one `io.max` line for a device
pub fn format_io_max(device: &str, bytes_per_sec: Option<u64>) -> String {
    match bytes_per_sec {
        None => format!("{device} rbps=max wbps=max"),
        Some(limit) => format!("{device} rbps={limit} wbps={limit}"),
    }
}
