//! Usage sampling from the cgroup filesystem
//!
//! This module reads per-workload resource counters from the cgroup v2
//! unified hierarchy, keeps the bounded CPU demand history the predictors
//! consume, and maps runtime container ids onto control-group paths.

mod cgroup_v2;
mod history;
mod resolver;


pub use cgroup_v2::CgroupV2Sampler;
pub use history::{History, HISTORY_CAPACITY};
pub use resolver::{container_id_hint, CgroupPathResolver, WorkloadResolver};

use crate::error::{AgentError, Result};
use crate::models::Sample;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

pub use async_trait::async_trait;

/// Trait for usage sampling implementations
#[async_trait]
pub trait UsageSampler: Send + Sync {
    /// Read the current counters of one workload.
    ///
    /// Never fails: unreadable counters are reported as `None` in the sample.
    async fn sample(&self, workload: &str) -> Sample;
}

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}

/// Detect which cgroup version is mounted at `cgroup_root`
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    // Check for cgroup v2 unified hierarchy
    let v2_controllers = cgroup_root.join("cgroup.controllers");
    if fs::metadata(&v2_controllers).await.is_ok() {
        return CgroupVersion::V2;
    }

    // Check for cgroup v1 controllers
    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpuacct).await.is_ok() {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}

/// Create the sampler for the hierarchy mounted at `cgroup_root`.
///
/// Fails when the root is not accessible at all, or when only the legacy v1
/// hierarchy is mounted: limits are written in v2 formats.
pub async fn create_sampler(cgroup_root: &Path) -> Result<Arc<dyn UsageSampler>> {
    if fs::metadata(cgroup_root).await.is_err() {
        return Err(AgentError::config(format!(
            "cgroup root {} is not accessible",
            cgroup_root.display()
        )));
    }

    match detect_cgroup_version(cgroup_root).await {
        CgroupVersion::V2 => {
            tracing::info!("Detected cgroup v2, using unified hierarchy sampler");
            Ok(Arc::new(CgroupV2Sampler::new(cgroup_root)))
        }
        CgroupVersion::V1 => Err(AgentError::config(format!(
            "cgroup v1 hierarchy at {} is not supported, limits require cgroup v2",
            cgroup_root.display()
        ))),
        CgroupVersion::Unknown => {
            tracing::warn!("Could not detect cgroup version, defaulting to v2");
            Ok(Arc::new(CgroupV2Sampler::new(cgroup_root)))
        }
    }
}
