//! cgroup v2 usage sampling
//!
//! Reads counters from the unified cgroup v2 hierarchy:
//! - cpu.stat for cumulative CPU usage and throttling
//! - memory.current for current memory usage
//! - io.stat for cumulative bytes read and written per device

use super::UsageSampler;
use crate::error::{AgentError, Result};
use crate::models::Sample;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::debug;

/// Counters parsed from cpu.stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub usage_usec: Option<u64>,
    pub nr_throttled: Option<u64>,
}

/// Sampler for the cgroup v2 unified hierarchy
pub struct CgroupV2Sampler {
    cgroup_root: PathBuf,
}

impl CgroupV2Sampler {
    /// Create a new cgroup v2 sampler
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    /// Check if cgroup v2 is available on this system
    pub async fn is_available(&self) -> bool {
        let cgroup_type_file = self.cgroup_root.join("cgroup.controllers");
        fs::metadata(&cgroup_type_file).await.is_ok()
    }

    /// Build full cgroup filesystem path from a workload's relative cgroup path
    pub fn build_cgroup_fs_path(&self, workload: &str) -> PathBuf {
        let relative = workload.trim_start_matches('/');
        if relative.is_empty() || relative == "." {
            return self.cgroup_root.clone();
        }
        self.cgroup_root.join(relative)
    }

    /// Parse cpu.stat file contents.
    /// Keys that are missing or malformed stay `None`.
    pub fn parse_cpu_stat(content: &str) -> CpuStat {
        let mut stat = CpuStat::default();

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                match parts[0] {
                    "usage_usec" => stat.usage_usec = parts[1].parse().ok(),
                    "nr_throttled" => stat.nr_throttled = parts[1].parse().ok(),
                    _ => {}
                }
            }
        }

        stat
    }

    /// Parse io.stat file contents and return total read + written bytes.
    ///
    /// Format is one line per device: `8:0 rbytes=100 wbytes=200 rios=1 ...`.
    /// An empty file means no I/O has happened yet and sums to zero.
    pub fn parse_io_stat(content: &str) -> u64 {
        content
            .lines()
            .flat_map(|line| line.split_whitespace().skip(1))
            .filter_map(|field| {
                let (key, value) = field.split_once('=')?;
                match key {
                    "rbytes" | "wbytes" => value.parse::<u64>().ok(),
                    _ => None,
                }
            })
            .fold(0u64, |total, bytes| total.saturating_add(bytes))
    }

    /// Devices (`major:minor`) listed in io.stat
    pub fn parse_io_devices(content: &str) -> Vec<String> {
        content
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|device| device.contains(':'))
            .map(str::to_string)
            .collect()
    }

    /// Parse a single-value file such as memory.current
    pub fn parse_single_value(content: &str) -> Option<u64> {
        content.trim().parse().ok()
    }

    /// Read a counter file for a workload
    async fn read_counter_file(&self, cgroup_path: &Path, filename: &str) -> Result<String> {
        let file_path = cgroup_path.join(filename);
        fs::read_to_string(&file_path)
            .await
            .map_err(|source| AgentError::TransientIo {
                path: file_path,
                source,
            })
    }

    /// Read a counter file, degrading to `None` when it cannot be read
    async fn read_or_degrade(
        &self,
        workload: &str,
        cgroup_path: &Path,
        filename: &str,
    ) -> Option<String> {
        match self.read_counter_file(cgroup_path, filename).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(workload = %workload, error = %e, "Counter unavailable this tick");
                None
            }
        }
    }
}

#[async_trait]
impl UsageSampler for CgroupV2Sampler {
    async fn sample(&self, workload: &str) -> Sample {
        let cgroup_path = self.build_cgroup_fs_path(workload);
        let timestamp = chrono::Utc::now().timestamp_millis();
        let taken_at = Instant::now();

        let cpu = self
            .read_or_degrade(workload, &cgroup_path, "cpu.stat")
            .await
            .map(|content| Self::parse_cpu_stat(&content))
            .unwrap_or_default();

        let memory_bytes = self
            .read_or_degrade(workload, &cgroup_path, "memory.current")
            .await
            .and_then(|content| Self::parse_single_value(&content));

        let io_bytes = self
            .read_or_degrade(workload, &cgroup_path, "io.stat")
            .await
            .map(|content| Self::parse_io_stat(&content));

        Sample {
            workload: workload.to_string(),
            timestamp,
            taken_at,
            cpu_usage_usec: cpu.usage_usec,
            cpu_throttled_periods: cpu.nr_throttled,
            memory_bytes,
            io_bytes,
        }
    }
}
